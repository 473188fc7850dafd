// Formatting codes accepted after the `§` escape marker.

/// Marker that introduces a one-character formatting code.
pub const ESCAPE_MARKER: char = '§';

/// One of the 16 exclusive text colors (`§0`..`§f`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    DarkBlue,
    DarkGreen,
    DarkAqua,
    DarkRed,
    DarkPurple,
    Gold,
    Gray,
    DarkGray,
    Blue,
    Green,
    Aqua,
    Red,
    LightPurple,
    Yellow,
    White,
}

impl Color {
    pub const ALL: [Color; 16] = [
        Color::Black,
        Color::DarkBlue,
        Color::DarkGreen,
        Color::DarkAqua,
        Color::DarkRed,
        Color::DarkPurple,
        Color::Gold,
        Color::Gray,
        Color::DarkGray,
        Color::Blue,
        Color::Green,
        Color::Aqua,
        Color::Red,
        Color::LightPurple,
        Color::Yellow,
        Color::White,
    ];

    /// Lower-case code character (`0`-`9`, `a`-`f`).
    pub fn code(self) -> char {
        let index = self as u32;
        char::from_digit(index, 16).unwrap_or('f')
    }

    pub fn from_code(code: char) -> Option<Self> {
        let index = code.to_digit(16)?;
        Self::ALL.get(index as usize).copied()
    }

    pub fn class_name(self) -> String {
        format!("mc-color-{}", self.code())
    }

    /// SGR foreground parameter for 16-color terminals.
    pub fn ansi_fg(self) -> u8 {
        match self {
            Self::Black => 30,
            Self::DarkBlue => 34,
            Self::DarkGreen => 32,
            Self::DarkAqua => 36,
            Self::DarkRed => 31,
            Self::DarkPurple => 35,
            Self::Gold => 33,
            Self::Gray => 37,
            Self::DarkGray => 90,
            Self::Blue => 94,
            Self::Green => 92,
            Self::Aqua => 96,
            Self::Red => 91,
            Self::LightPurple => 95,
            Self::Yellow => 93,
            Self::White => 97,
        }
    }
}

/// Cumulative text formats (`§k`..`§o`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Obfuscated,
    Bold,
    Strikethrough,
    Underline,
    Italic,
}

impl Format {
    pub const ALL: [Format; 5] =
        [Format::Obfuscated, Format::Bold, Format::Strikethrough, Format::Underline, Format::Italic];

    pub fn code(self) -> char {
        match self {
            Self::Obfuscated => 'k',
            Self::Bold => 'l',
            Self::Strikethrough => 'm',
            Self::Underline => 'n',
            Self::Italic => 'o',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'k' => Some(Self::Obfuscated),
            'l' => Some(Self::Bold),
            'm' => Some(Self::Strikethrough),
            'n' => Some(Self::Underline),
            'o' => Some(Self::Italic),
            _ => None,
        }
    }

    pub fn class_name(self) -> &'static str {
        match self {
            Self::Obfuscated => "mc-obfuscated",
            Self::Bold => "mc-bold",
            Self::Strikethrough => "mc-strikethrough",
            Self::Underline => "mc-underline",
            Self::Italic => "mc-italic",
        }
    }

    /// SGR parameter, if the terminal has an equivalent. Obfuscation is
    /// rendered by scrambling the text instead.
    pub fn ansi_sgr(self) -> Option<u8> {
        match self {
            Self::Obfuscated => None,
            Self::Bold => Some(1),
            Self::Strikethrough => Some(9),
            Self::Underline => Some(4),
            Self::Italic => Some(3),
        }
    }
}

/// A recognized code following the escape marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleCode {
    Color(Color),
    Format(Format),
    Reset,
}

impl StyleCode {
    /// Codes are case-insensitive; anything outside `0-9a-fk-or` is `None`.
    pub fn from_char(code: char) -> Option<Self> {
        let code = code.to_ascii_lowercase();
        if code == 'r' {
            return Some(Self::Reset);
        }
        if let Some(format) = Format::from_code(code) {
            return Some(Self::Format(format));
        }
        if code.is_ascii_hexdigit() {
            return Color::from_code(code).map(Self::Color);
        }
        None
    }
}
