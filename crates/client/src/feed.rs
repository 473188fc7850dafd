// Live message feed: connection manager, renderer and animator in one owner.
//
// The pipeline for each transport signal is manager -> dedup -> renderer ->
// animator. The feed owns the rendered list; nothing here is global.

use std::time::{Duration, Instant};

use chatfeed_common::protocol::stream::MessageKind;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use crate::render::obfuscate::{ObfuscationAnimator, DEFAULT_OBFUSCATION_TICK_MS};
use crate::render::{MessageRenderer, RenderedMessage};
use crate::stream::{
    EventDisposition, SignalEnvelope, StreamConnectionManager, StreamPolicy, StreamTransport,
};

pub const DEFAULT_MAX_MESSAGES: usize = 2000;

/// Changes the consumer should reflect.
#[derive(Debug, Clone)]
pub enum FeedUpdate {
    Appended(RenderedMessage),
    /// Everything rendered so far is gone.
    Cleared,
    /// An `[INFO]` message arrived while a send was in flight.
    SendCompleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSettings {
    pub policy: StreamPolicy,
    pub obfuscation_tick: Duration,
    /// Oldest messages are dropped beyond this many.
    pub max_messages: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            policy: StreamPolicy::default(),
            obfuscation_tick: Duration::from_millis(DEFAULT_OBFUSCATION_TICK_MS),
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

pub struct ChatFeed<T: StreamTransport> {
    manager: StreamConnectionManager<T>,
    renderer: MessageRenderer,
    animator: ObfuscationAnimator,
    messages: Vec<RenderedMessage>,
    max_messages: usize,
    send_in_flight: bool,
    rng: StdRng,
}

impl<T: StreamTransport> ChatFeed<T> {
    pub fn new(transport: T, settings: FeedSettings, now: Instant) -> Self {
        Self {
            manager: StreamConnectionManager::new(transport, settings.policy, now),
            renderer: MessageRenderer::new(),
            animator: ObfuscationAnimator::new(settings.obfuscation_tick),
            messages: Vec::new(),
            max_messages: settings.max_messages.max(1),
            send_in_flight: false,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn manager(&self) -> &StreamConnectionManager<T> {
        &self.manager
    }

    pub fn animator(&self) -> &ObfuscationAnimator {
        &self.animator
    }

    pub fn messages(&self) -> &[RenderedMessage] {
        &self.messages
    }

    pub fn is_send_in_flight(&self) -> bool {
        self.send_in_flight
    }

    pub fn start(&mut self, now: Instant) {
        self.manager.start(now);
    }

    pub fn ensure_active(&mut self, force: bool, now: Instant) {
        self.manager.ensure_active(force, now);
    }

    pub fn handle_signal(&mut self, envelope: &SignalEnvelope, now: Instant) -> Vec<FeedUpdate> {
        let Some(disposition) = self.manager.handle_signal(envelope, now) else {
            return Vec::new();
        };

        match disposition {
            EventDisposition::Deliver(payload) => {
                let message = self.renderer.render(&payload, &mut self.animator, now);
                let mut updates = Vec::with_capacity(2);
                let completes_send = message.kind == MessageKind::Info && self.send_in_flight;

                self.messages.push(message.clone());
                while self.messages.len() > self.max_messages {
                    self.remove_message(0);
                }
                updates.push(FeedUpdate::Appended(message));

                if completes_send {
                    debug!("info message completed pending send");
                    self.send_in_flight = false;
                    updates.push(FeedUpdate::SendCompleted);
                }
                updates
            }
            EventDisposition::Clear => {
                self.drop_rendered();
                vec![FeedUpdate::Cleared]
            }
            EventDisposition::Stale
            | EventDisposition::Heartbeat
            | EventDisposition::Ignored
            | EventDisposition::Malformed
            | EventDisposition::Duplicate(_) => Vec::new(),
        }
    }

    /// User-issued clear: drop rendered state, delivered ids and the cursor.
    pub fn clear(&mut self) {
        self.drop_rendered();
        self.manager.clear_history();
    }

    /// Take one message out of the list and stop animating its spans.
    pub fn remove_message(&mut self, index: usize) -> Option<RenderedMessage> {
        if index >= self.messages.len() {
            return None;
        }
        let message = self.messages.remove(index);
        for span in message.spans() {
            self.animator.unregister(span.id());
        }
        Some(message)
    }

    pub fn mark_send_in_flight(&mut self) {
        self.send_in_flight = true;
    }

    /// Run every due timer: reconnect, watchdog and animation.
    pub fn poll_timers(&mut self, now: Instant) {
        self.manager.poll_timers(now);
        self.animator.poll(now, &mut self.rng);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.manager.next_deadline(), self.animator.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop all periodic work and close the transport.
    pub fn shutdown(&mut self) {
        self.animator.clear();
        self.manager.shutdown();
    }

    fn drop_rendered(&mut self) {
        self.animator.clear();
        self.messages.clear();
    }
}
