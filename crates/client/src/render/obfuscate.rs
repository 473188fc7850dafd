// Obfuscation animator: one shared timer scrambling every live target.
//
// Targets are `ObfuscatedSpan` handles shared between a rendered message and
// the registry. The first tick captures each span's original text; every tick
// rewrites the displayed text with random symbols of the same length.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::trace;

pub const DEFAULT_OBFUSCATION_TICK_MS: u64 = 50;

/// Replacement symbols for scrambled characters.
pub const SYMBOL_POOL: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()[]{}|;:,.<>?";

#[derive(Debug)]
struct SpanText {
    displayed: String,
    original: Option<String>,
}

/// Live text of one obfuscated run.
#[derive(Debug, Clone)]
pub struct ObfuscatedSpan {
    id: String,
    text: Arc<Mutex<SpanText>>,
}

impl ObfuscatedSpan {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Arc::new(Mutex::new(SpanText { displayed: text.into(), original: None })),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn displayed(&self) -> String {
        self.lock().displayed.clone()
    }

    /// The captured source text, once the first tick has run.
    pub fn original(&self) -> Option<String> {
        self.lock().original.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SpanText> {
        self.text.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scramble<R: Rng + ?Sized>(&self, rng: &mut R) {
        let mut guard = self.lock();
        let text = &mut *guard;
        let original = text.original.get_or_insert_with(|| text.displayed.clone());
        text.displayed = scramble(original, rng);
    }
}

/// Same length as `source`; spaces stay, everything else becomes a random
/// pool symbol.
pub fn scramble<R: Rng + ?Sized>(source: &str, rng: &mut R) -> String {
    source
        .chars()
        .map(|ch| {
            if ch == ' ' {
                ' '
            } else {
                char::from(SYMBOL_POOL[rng.gen_range(0..SYMBOL_POOL.len())])
            }
        })
        .collect()
}

/// Registry of live targets plus the shared tick deadline.
#[derive(Debug)]
pub struct ObfuscationAnimator {
    targets: BTreeMap<String, ObfuscatedSpan>,
    interval: Duration,
    next_tick: Option<Instant>,
}

impl Default for ObfuscationAnimator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_OBFUSCATION_TICK_MS))
    }
}

impl ObfuscationAnimator {
    pub fn new(interval: Duration) -> Self {
        Self { targets: BTreeMap::new(), interval, next_tick: None }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Add a target. The first target starts the timer.
    pub fn register(&mut self, span: ObfuscatedSpan, now: Instant) {
        self.targets.insert(span.id().to_string(), span);
        if self.targets.len() == 1 && self.next_tick.is_none() {
            trace!("obfuscation timer started");
            self.next_tick = Some(now + self.interval);
        }
    }

    /// Remove a target. Removing the last one stops the timer.
    pub fn unregister(&mut self, id: &str) {
        self.targets.remove(id);
        if self.targets.is_empty() && self.next_tick.take().is_some() {
            trace!("obfuscation timer stopped");
        }
    }

    pub fn clear(&mut self) {
        self.targets.clear();
        self.next_tick = None;
    }

    /// Tick if the timer is due. Returns whether a tick ran.
    pub fn poll<R: Rng + ?Sized>(&mut self, now: Instant, rng: &mut R) -> bool {
        match self.next_tick {
            Some(at) if at <= now => {
                self.tick(rng);
                self.next_tick = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    pub fn tick<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for span in self.targets.values() {
            span.scramble(rng);
        }
    }
}
