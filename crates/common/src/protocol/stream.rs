// Server-sent event payloads for the `/stream` endpoint.
//
// The relay emits one JSON object per `data:` line. Every field is optional
// on the wire; consumers are lenient about ids and durations because older
// senders emit them as strings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const STREAM_PATH: &str = "/stream";
pub const CLEAR_PATH: &str = "/clear-messages";
pub const PUBLISH_PATH: &str = "/messages";

/// Query parameter carrying the resume cursor when headers can't be set.
pub const RESUME_QUERY_PARAM: &str = "last_event_id";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// SSE event type for liveness-only signals.
pub const HEARTBEAT_EVENT: &str = "heartbeat";

pub const ERROR_SENDER: &str = "[ERROR]";
pub const INFO_SENDER: &str = "[INFO]";

/// Server-assigned, monotonically increasing event id.
pub type EventId = i64;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("malformed stream payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("stream payload is not a JSON object")]
    NotAnObject,
}

/// One event body from the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamPayload {
    /// Raw id as sent. Use [`StreamPayload::event_id`] to interpret it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false", deserialize_with = "truthy")]
    pub clear: bool,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_text")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_text")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_duration")]
    pub duration: Option<Duration>,
    #[serde(default, deserialize_with = "exactly_true")]
    pub cache_hit: bool,
    #[serde(default, deserialize_with = "exactly_true")]
    pub glossary_match: bool,
    #[serde(default, deserialize_with = "exactly_true")]
    pub skip_src_lang: bool,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_usage")]
    pub usage: Option<Usage>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Loose truthiness for the reset flag: any non-empty, non-zero value.
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(flag) => flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    })
}

/// Tag flags only count when they are literally `true`.
fn exactly_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

/// Strings pass through and numbers are shown as sent. Any other type is
/// dropped.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(Duration::Label(text)),
        Value::Number(number) => number.as_f64().map(Duration::Seconds),
        _ => None,
    })
}

fn lenient_usage<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Usage>, D::Error> {
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => Ok(serde_json::from_value(value).ok()),
        _ => Ok(None),
    }
}

fn token_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Value::deserialize(deserializer)?.as_u64().unwrap_or(0))
}

impl StreamPayload {
    /// Only non-JSON or non-object data is rejected. Ill-typed optional
    /// fields decode as absent so a single odd field never drops the event.
    pub fn from_json(data: &str) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_str(data)?;
        if !value.is_object() {
            return Err(PayloadError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The full-reset signal.
    pub fn clear_signal() -> Self {
        Self { clear: true, ..Self::default() }
    }

    /// Interpret `id` leniently. Integer numbers are taken as-is, strings use
    /// a leading-integer parse, and everything else counts as absent.
    pub fn event_id(&self) -> Option<EventId> {
        match self.id.as_ref()? {
            Value::Number(number) => number.as_i64(),
            Value::String(text) => parse_event_id(text),
            _ => None,
        }
    }

    pub fn kind(&self) -> MessageKind {
        MessageKind::classify(self.name.as_deref())
    }

    pub fn message_text(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// Token accounting attached to translated messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default, deserialize_with = "token_count")]
    pub prompt_tokens: u64,
    #[serde(default, deserialize_with = "token_count")]
    pub completion_tokens: u64,
    #[serde(default, deserialize_with = "token_count")]
    pub total_tokens: u64,
}

impl Usage {
    /// `"{prompt}+{completion}={total} tokens"`
    pub fn detail(&self) -> String {
        format!("{}+{}={} tokens", self.prompt_tokens, self.completion_tokens, self.total_tokens)
    }
}

/// Processing duration, either a preformatted label or raw seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Duration {
    Seconds(f64),
    Label(String),
}

impl Duration {
    /// Display label, or `None` when the value is empty or zero. Numbers are
    /// shown as sent; the relay already sends preformatted labels.
    pub fn label(&self) -> Option<String> {
        match self {
            Self::Seconds(secs) if *secs == 0.0 || !secs.is_finite() => None,
            Self::Seconds(secs) => Some(secs.to_string()),
            Self::Label(text) if text.trim().is_empty() => None,
            Self::Label(text) => Some(text.clone()),
        }
    }
}

/// Human label for a processing duration in seconds.
pub fn format_duration(secs: f64) -> String {
    if secs < 0.001 {
        "instant".to_string()
    } else if secs < 1.0 {
        format!("{}ms", (secs * 1000.0).round() as u64)
    } else {
        let rounded = (secs * 100.0).round() / 100.0;
        format!("{rounded}s")
    }
}

/// Message classification by sender name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    System,
    Error,
    Info,
    User,
}

impl MessageKind {
    pub fn classify(name: Option<&str>) -> Self {
        match name {
            None | Some("") => Self::System,
            Some(ERROR_SENDER) => Self::Error,
            Some(INFO_SENDER) => Self::Info,
            Some(_) => Self::User,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Error => "error",
            Self::Info => "info",
            Self::User => "user",
        }
    }
}

/// Leading-integer parse: optional surrounding whitespace, optional sign,
/// then decimal digits. Trailing garbage after the digits is ignored.
pub fn parse_event_id(raw: &str) -> Option<EventId> {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first()? {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits_end = rest.bytes().position(|b| !b.is_ascii_digit()).unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }
    let magnitude: EventId = rest[..digits_end].parse().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Body of `POST /clear-messages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub message: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub info: Option<PublishInfo>,
}

/// Optional metadata a publisher may attach.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishInfo {
    #[serde(default)]
    pub cache_hit: bool,
    #[serde(default)]
    pub glossary_match: bool,
    #[serde(default)]
    pub skip_src_lang: bool,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub id: EventId,
}
