// Two-state lexer for `§`-code markup.
//
// Literal mode accumulates text until the escape marker; code mode consumes
// exactly one character. Recognized codes flush the pending literal as a run
// and update the active style. Unrecognized codes are swallowed.

use super::codes::{StyleCode, ESCAPE_MARKER};
use super::{StyleRun, StyleSet, StyledText};

/// Textual form of the escape marker some senders emit instead of the glyph.
const ESCAPED_MARKER: &str = "\\u00A7";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Literal,
    Code,
}

struct Lexer {
    state: LexState,
    style: StyleSet,
    literal: String,
    runs: Vec<StyleRun>,
}

impl Lexer {
    fn new() -> Self {
        Self {
            state: LexState::Literal,
            style: StyleSet::default(),
            literal: String::new(),
            runs: Vec::new(),
        }
    }

    fn feed(&mut self, ch: char) {
        match self.state {
            LexState::Literal => {
                if ch == ESCAPE_MARKER {
                    self.state = LexState::Code;
                } else {
                    self.literal.push(ch);
                }
            }
            LexState::Code => {
                self.state = LexState::Literal;
                if let Some(code) = StyleCode::from_char(ch) {
                    self.flush();
                    self.style.apply(code);
                }
            }
        }
    }

    fn flush(&mut self) {
        if self.literal.is_empty() {
            return;
        }
        self.runs.push(StyleRun {
            text: std::mem::take(&mut self.literal),
            style: self.style.clone(),
        });
    }

    fn finish(mut self) -> StyledText {
        // A dangling marker at end of input has no code and produces nothing.
        self.flush();
        StyledText { runs: self.runs }
    }
}

/// Parse one message string into styled runs.
pub fn parse_styled(input: &str) -> StyledText {
    let normalized;
    let source = if input.contains(ESCAPED_MARKER) {
        normalized = input.replace(ESCAPED_MARKER, &ESCAPE_MARKER.to_string());
        normalized.as_str()
    } else {
        input
    };

    let mut lexer = Lexer::new();
    for ch in source.chars() {
        lexer.feed(ch);
    }
    lexer.finish()
}
