// Output format auto-detection and message rendering for the CLI.
//
// TTY → ANSI-styled lines. Piped/redirected → one JSON object per line.
// `--json` forces JSON output regardless of terminal.

use std::io::{self, IsTerminal, Write};

use chatfeed_client::feed::FeedUpdate;
use chatfeed_client::render::obfuscate::scramble;
use chatfeed_client::render::{RenderedMessage, StyledField, Tag};
use chatfeed_common::protocol::stream::{EventId, MessageKind};
use chatfeed_common::style::{RunView, StyledText};
use rand::Rng;
use serde::Serialize;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_DIM: &str = "\x1b[2m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text with ANSI styling.
    Human,
    /// Machine-readable JSON (one object per line).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

// ── JSON shapes ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MessageLine {
    pub id: Option<EventId>,
    pub kind: MessageKind,
    pub name: Option<String>,
    pub text: String,
    pub time: String,
    pub html: String,
    pub runs: Vec<RunView>,
    pub tags: Vec<TagLine>,
}

#[derive(Debug, Serialize)]
pub struct TagLine {
    pub class: &'static str,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&RenderedMessage> for MessageLine {
    fn from(message: &RenderedMessage) -> Self {
        Self {
            id: message.id,
            kind: message.kind,
            name: message.name.as_ref().map(StyledField::plain_text),
            text: message.body.plain_text(),
            time: message.time.clone(),
            html: message.to_html(),
            runs: message.body.text.runs.iter().map(RunView::from).collect(),
            tags: message
                .tags
                .iter()
                .map(|tag| TagLine { class: tag.class_name(), label: tag.label(), detail: tag.detail() })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct EventLine {
    event: &'static str,
}

// ── Writers ─────────────────────────────────────────────────────────

/// Write one feed update. Returns without output for updates that have no
/// human rendering.
pub fn write_update<W, R>(writer: &mut W, format: OutputFormat, update: &FeedUpdate, rng: &mut R) -> io::Result<()>
where
    W: Write,
    R: Rng + ?Sized,
{
    match (format, update) {
        (OutputFormat::Human, FeedUpdate::Appended(message)) => {
            writeln!(writer, "{}", render_human(message, rng))
        }
        (OutputFormat::Human, FeedUpdate::Cleared) => {
            writeln!(writer, "{ANSI_DIM}── messages cleared ──{ANSI_RESET}")
        }
        (OutputFormat::Human, FeedUpdate::SendCompleted) => Ok(()),
        (OutputFormat::Json, FeedUpdate::Appended(message)) => write_json(writer, &MessageLine::from(message)),
        (OutputFormat::Json, FeedUpdate::Cleared) => write_json(writer, &EventLine { event: "cleared" }),
        (OutputFormat::Json, FeedUpdate::SendCompleted) => {
            write_json(writer, &EventLine { event: "send_completed" })
        }
    }
}

/// Write a value to a provided writer.
pub fn write_output<W, T, F>(writer: &mut W, format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => writeln!(writer, "{}", human_fn(value)),
        OutputFormat::Json => write_json(writer, value),
    }
}

fn write_json<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
    serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
    writeln!(writer)
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line("error", message, io::stderr().is_terminal(), ANSI_RED);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({ "error": { "code": code, "message": message } });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}

// ── Human rendering ─────────────────────────────────────────────────

/// `[time] name: body  [tags]`, styled with SGR codes. Obfuscated runs
/// are printed scrambled.
pub fn render_human<R: Rng + ?Sized>(message: &RenderedMessage, rng: &mut R) -> String {
    let mut line = String::new();
    if !message.time.is_empty() {
        line.push_str(&format!("{ANSI_DIM}[{}]{ANSI_RESET} ", printable(&message.time)));
    }
    if let Some(name) = &message.name {
        line.push_str(&styled_ansi(&name.text, rng));
        line.push_str(": ");
    }
    line.push_str(&styled_ansi(&message.body.text, rng));
    for tag in &message.tags {
        line.push_str(&format!("  {ANSI_DIM}[{}]{ANSI_RESET}", printable(&tag_text(tag))));
    }
    line
}

fn tag_text(tag: &Tag) -> String {
    tag.detail().unwrap_or_else(|| tag.label())
}

/// Drop C0/C1 control characters (tab excepted) so message text cannot
/// smuggle escape sequences to the terminal.
fn printable(text: &str) -> String {
    text.chars().filter(|ch| *ch == '\t' || !ch.is_control()).collect()
}

pub fn styled_ansi<R: Rng + ?Sized>(text: &StyledText, rng: &mut R) -> String {
    let mut out = String::new();
    for run in &text.runs {
        let params: Vec<String> = run
            .style
            .color()
            .map(|color| color.ansi_fg())
            .into_iter()
            .chain(run.style.formats().filter_map(|format| format.ansi_sgr()))
            .map(|param| param.to_string())
            .collect();
        let visible = if run.is_obfuscated() { scramble(&run.text, rng) } else { printable(&run.text) };

        if params.is_empty() {
            out.push_str(&visible);
        } else {
            out.push_str(&format!("\x1b[{}m{visible}{ANSI_RESET}", params.join(";")));
        }
    }
    out
}
