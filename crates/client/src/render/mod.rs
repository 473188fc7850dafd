// Message renderer: stream payloads to styled, animatable message nodes.
//
// Sender and body go through the styled text engine. Every obfuscated run
// gets a fresh `obf-<n>` span id and is registered with the animator while
// the message is being rendered, so it is live before the caller sees it.

pub mod obfuscate;

use std::time::Instant;

use chatfeed_common::protocol::stream::{EventId, MessageKind, StreamPayload, Usage};
use chatfeed_common::style::{escape_html, parse_styled, StyledText};

use self::obfuscate::{ObfuscatedSpan, ObfuscationAnimator};

// ── Rendered nodes ──────────────────────────────────────────────────

/// Styled text plus the live spans attached to its obfuscated runs.
#[derive(Debug, Clone)]
pub struct StyledField {
    pub text: StyledText,
    /// Run index and span handle, in run order.
    spans: Vec<(usize, ObfuscatedSpan)>,
}

impl StyledField {
    pub fn spans(&self) -> impl Iterator<Item = &ObfuscatedSpan> {
        self.spans.iter().map(|(_, span)| span)
    }

    pub fn span_for_run(&self, index: usize) -> Option<&ObfuscatedSpan> {
        self.spans.iter().find(|(run, _)| *run == index).map(|(_, span)| span)
    }

    pub fn to_html(&self) -> String {
        self.text.to_html(|index| self.span_for_run(index).map(|span| span.id().to_string()))
    }

    pub fn plain_text(&self) -> String {
        self.text.plain_text()
    }
}

/// Metadata chips shown under a message, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Usage(Usage),
    Duration(String),
    Glossary,
    Skipped,
    CacheHit,
}

impl Tag {
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Usage(_) => "usage-tag",
            Self::Duration(_) => "duration-tag",
            Self::Glossary => "glossary-match-tag",
            Self::Skipped => "skip-src-lang-tag",
            Self::CacheHit => "cache-hit-tag",
        }
    }

    /// Short label; for usage this is the total token count.
    pub fn label(&self) -> String {
        match self {
            Self::Usage(usage) => usage.total_tokens.to_string(),
            Self::Duration(label) => label.clone(),
            Self::Glossary => "glossary".to_string(),
            Self::Skipped => "skipped".to_string(),
            Self::CacheHit => "cache hit".to_string(),
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Usage(usage) => Some(usage.detail()),
            _ => None,
        }
    }

    fn to_html(&self) -> String {
        let class = self.class_name();
        match self {
            Self::Usage(usage) => format!(
                "<div class=\"{class}\"><span class=\"usage-total\">{}</span>\
                 <span class=\"usage-detail\">{}</span></div>",
                usage.total_tokens,
                escape_html(&usage.detail())
            ),
            Self::Duration(label) => format!("<div class=\"{class}\">{}</div>", escape_html(label)),
            Self::Glossary => {
                format!("<div class=\"{class}\"><span class=\"glossary-match-text\">glossary</span></div>")
            }
            Self::Skipped => {
                format!("<div class=\"{class}\"><span class=\"skip-src-lang-text\">skipped</span></div>")
            }
            Self::CacheHit => {
                format!("<div class=\"{class}\"><span class=\"cache-hit-text\">cache hit</span></div>")
            }
        }
    }
}

/// One message as shown in the list.
#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub id: Option<EventId>,
    pub kind: MessageKind,
    /// Absent for system messages.
    pub name: Option<StyledField>,
    pub body: StyledField,
    pub time: String,
    pub tags: Vec<Tag>,
}

impl RenderedMessage {
    /// Every live span in the message, sender first.
    pub fn spans(&self) -> impl Iterator<Item = &ObfuscatedSpan> {
        self.name.iter().flat_map(StyledField::spans).chain(self.body.spans())
    }

    pub fn to_html(&self) -> String {
        let mut html = format!("<li><div class=\"message-bubble {}\">", self.kind.as_str());
        if let Some(name) = &self.name {
            html.push_str("<span class=\"message-name\">");
            html.push_str(&name.to_html());
            html.push_str("</span>");
        }
        html.push_str("<div class=\"message-text\">");
        html.push_str(&self.body.to_html());
        html.push_str("</div><div class=\"message-time\">");
        html.push_str(&escape_html(&self.time));
        html.push_str("</div>");
        if !self.tags.is_empty() {
            html.push_str("<div class=\"bottom-tags-container\">");
            for tag in &self.tags {
                html.push_str(&tag.to_html());
            }
            html.push_str("</div>");
        }
        html.push_str("</div></li>");
        html
    }
}

// ── Renderer ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MessageRenderer {
    next_span: u64,
}

impl MessageRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(
        &mut self,
        payload: &StreamPayload,
        animator: &mut ObfuscationAnimator,
        now: Instant,
    ) -> RenderedMessage {
        let kind = payload.kind();
        let name = match (kind, payload.name.as_deref()) {
            (MessageKind::System, _) | (_, None) => None,
            (_, Some(name)) => Some(self.styled(name, animator, now)),
        };
        let body = self.styled(payload.message_text(), animator, now);

        RenderedMessage {
            id: payload.event_id(),
            kind,
            name,
            body,
            time: payload.time.clone().unwrap_or_default(),
            tags: bottom_tags(payload),
        }
    }

    fn styled(&mut self, raw: &str, animator: &mut ObfuscationAnimator, now: Instant) -> StyledField {
        let text = parse_styled(raw);
        let mut spans = Vec::new();
        for (index, run) in text.runs.iter().enumerate() {
            if !run.is_obfuscated() {
                continue;
            }
            self.next_span += 1;
            let span = ObfuscatedSpan::new(format!("obf-{}", self.next_span), run.text.clone());
            animator.register(span.clone(), now);
            spans.push((index, span));
        }
        StyledField { text, spans }
    }
}

fn bottom_tags(payload: &StreamPayload) -> Vec<Tag> {
    let mut tags = Vec::new();
    if let Some(usage) = payload.usage.as_ref().filter(|usage| usage.total_tokens != 0) {
        tags.push(Tag::Usage(usage.clone()));
    }
    if let Some(label) = payload.duration.as_ref().and_then(|duration| duration.label()) {
        tags.push(Tag::Duration(label));
    }
    if payload.glossary_match {
        tags.push(Tag::Glossary);
    }
    if payload.skip_src_lang {
        tags.push(Tag::Skipped);
    }
    if payload.cache_hit {
        tags.push(Tag::CacheHit);
    }
    tags
}
