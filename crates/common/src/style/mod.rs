// Styled text engine: `§`-code markup to structured, escapable runs.
//
// `parse_styled` is the entry point. Runs keep their literal text raw;
// escaping happens at the HTML boundary in `StyledText::to_html`.

mod codes;
mod lexer;

pub use codes::{Color, Format, StyleCode, ESCAPE_MARKER};
pub use lexer::parse_styled;

use serde::Serialize;

/// One entry of a run's class list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleClass {
    Color(Color),
    Format(Format),
}

impl StyleClass {
    pub fn class_name(self) -> String {
        match self {
            Self::Color(color) => color.class_name(),
            Self::Format(format) => format.class_name().to_string(),
        }
    }
}

/// Active style: at most one color plus distinct formats, in application order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSet {
    classes: Vec<StyleClass>,
}

impl StyleSet {
    pub fn apply(&mut self, code: StyleCode) {
        match code {
            StyleCode::Reset => self.classes.clear(),
            StyleCode::Color(color) => {
                self.classes.retain(|class| !matches!(class, StyleClass::Color(_)));
                self.classes.push(StyleClass::Color(color));
            }
            StyleCode::Format(format) => {
                let class = StyleClass::Format(format);
                if !self.classes.contains(&class) {
                    self.classes.push(class);
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn classes(&self) -> &[StyleClass] {
        &self.classes
    }

    pub fn color(&self) -> Option<Color> {
        self.classes.iter().find_map(|class| match class {
            StyleClass::Color(color) => Some(*color),
            StyleClass::Format(_) => None,
        })
    }

    pub fn formats(&self) -> impl Iterator<Item = Format> + '_ {
        self.classes.iter().filter_map(|class| match class {
            StyleClass::Format(format) => Some(*format),
            StyleClass::Color(_) => None,
        })
    }

    pub fn has_format(&self, format: Format) -> bool {
        self.classes.contains(&StyleClass::Format(format))
    }

    pub fn is_obfuscated(&self) -> bool {
        self.has_format(Format::Obfuscated)
    }

    /// Space-separated class attribute value.
    pub fn class_attr(&self) -> String {
        self.classes.iter().map(|class| class.class_name()).collect::<Vec<_>>().join(" ")
    }
}

/// A contiguous span of literal text with a snapshot of the active style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRun {
    pub text: String,
    pub style: StyleSet,
}

impl StyleRun {
    pub fn is_obfuscated(&self) -> bool {
        self.style.is_obfuscated()
    }

    pub fn escaped_text(&self) -> String {
        escape_html(&self.text)
    }
}

/// Parsed message text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyledText {
    pub runs: Vec<StyleRun>,
}

impl StyledText {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Literal text with all codes stripped.
    pub fn plain_text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    pub fn has_obfuscated(&self) -> bool {
        self.runs.iter().any(StyleRun::is_obfuscated)
    }

    /// Render as an HTML fragment.
    ///
    /// `span_id` is asked for an element id for every obfuscated run, in run
    /// order, so that callers can attach a live animation target to it.
    pub fn to_html<F>(&self, mut span_id: F) -> String
    where
        F: FnMut(usize) -> Option<String>,
    {
        let mut html = String::new();
        for (index, run) in self.runs.iter().enumerate() {
            if run.style.is_empty() {
                html.push_str(&run.escaped_text());
                continue;
            }
            html.push_str("<span class=\"");
            html.push_str(&run.style.class_attr());
            html.push('"');
            if run.is_obfuscated() {
                if let Some(id) = span_id(index) {
                    html.push_str(" id=\"");
                    html.push_str(&escape_html(&id));
                    html.push('"');
                }
            }
            html.push('>');
            html.push_str(&run.escaped_text());
            html.push_str("</span>");
        }
        html
    }
}

/// Serializable view of a run, for JSON output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunView {
    pub text: String,
    pub classes: Vec<String>,
    pub obfuscated: bool,
}

impl From<&StyleRun> for RunView {
    fn from(run: &StyleRun) -> Self {
        Self {
            text: run.text.clone(),
            classes: run.style.classes().iter().map(|class| class.class_name()).collect(),
            obfuscated: run.is_obfuscated(),
        }
    }
}

/// Escape text for embedding in HTML element content or attribute values.
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#039;"),
            other => escaped.push(other),
        }
    }
    escaped
}
