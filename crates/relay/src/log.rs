// Bounded in-memory message log backing `/stream`.
//
// Ids are contiguous within a clear revision: they start at 1, grow by one
// per publish, and restart at 1 when the log is cleared. Trimming only
// drops from the front, so `id - oldest_id` is always a valid index.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatfeed_common::protocol::stream::{
    format_duration, Duration as PayloadDuration, EventId, PublishInfo, PublishRequest, StreamPayload,
};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

/// One published message as retained by the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: EventId,
    pub name: Option<String>,
    pub message: String,
    /// Local wall-clock `HH:MM` at publish time.
    pub time: String,
    pub duration: Option<String>,
    pub info: PublishInfo,
}

impl MessageRecord {
    /// Wire payload for this record. Tag flags are always present.
    pub fn to_payload(&self) -> StreamPayload {
        StreamPayload {
            id: Some(Value::from(self.id)),
            clear: false,
            name: self.name.clone(),
            message: Some(self.message.clone()),
            time: Some(self.time.clone()),
            duration: self.duration.clone().map(PayloadDuration::Label),
            cache_hit: self.info.cache_hit,
            glossary_match: self.info.glossary_match,
            skip_src_lang: self.info.skip_src_lang,
            usage: self.info.usage.clone(),
        }
    }
}

/// Where a stream subscriber is in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamCursor {
    pub next_id: EventId,
    pub revision: u64,
}

/// What a subscriber has to send next.
#[derive(Debug, Default, PartialEq)]
pub struct Batch {
    /// The log was cleared since the cursor last looked.
    pub cleared: bool,
    pub records: Vec<MessageRecord>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.records.is_empty()
    }
}

#[derive(Debug)]
struct LogState {
    records: VecDeque<MessageRecord>,
    next_id: EventId,
    revision: u64,
}

impl LogState {
    fn oldest_id(&self) -> Option<EventId> {
        self.records.front().map(|record| record.id)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<LogState>,
    capacity: usize,
    /// Bumped on every publish or clear.
    changes: watch::Sender<u64>,
}

/// Cloneable handle to the shared log.
#[derive(Debug, Clone)]
pub struct MessageLog {
    shared: Arc<Shared>,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = watch::channel(0);
        let state = LogState { records: VecDeque::new(), next_id: 1, revision: 0 };
        Self { shared: Arc::new(Shared { state: Mutex::new(state), capacity: capacity.max(1), changes }) }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// Notified on every publish and clear.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Append a message stamped with the current local time.
    pub fn publish(&self, request: PublishRequest) -> MessageRecord {
        let time = chrono::Local::now().format("%H:%M").to_string();
        self.publish_at(request, time)
    }

    pub fn publish_at(&self, request: PublishRequest, time: String) -> MessageRecord {
        let record = {
            let mut state = self.lock();
            let record = MessageRecord {
                id: state.next_id,
                name: request.name,
                message: request.message,
                time,
                duration: request.duration_secs.filter(|secs| secs.is_finite()).map(format_duration),
                info: request.info.unwrap_or_default(),
            };
            state.next_id += 1;
            state.records.push_back(record.clone());
            while state.records.len() > self.shared.capacity {
                state.records.pop_front();
            }
            record
        };
        debug!(id = record.id, "message published");
        self.notify();
        record
    }

    /// Drop every record, restart ids at 1 and bump the clear revision.
    pub fn clear(&self) -> u64 {
        let revision = {
            let mut state = self.lock();
            state.records.clear();
            state.next_id = 1;
            state.revision += 1;
            state.revision
        };
        debug!(revision, "message log cleared");
        self.notify();
        revision
    }

    /// Starting position for a new subscriber. Without a resume id, or when
    /// the id after it has already been trimmed, start at the oldest
    /// retained record.
    pub fn cursor(&self, resume: Option<EventId>) -> StreamCursor {
        let state = self.lock();
        let oldest = state.oldest_id();
        let next_id = match (resume, oldest) {
            (None, Some(oldest)) => oldest,
            (None, None) => 1,
            (Some(last), Some(oldest)) if last.saturating_add(1) < oldest => oldest,
            (Some(last), _) => last.saturating_add(1),
        };
        StreamCursor { next_id, revision: state.revision }
    }

    /// Everything the cursor has not seen yet, advancing it past what is
    /// returned.
    pub fn drain(&self, cursor: &mut StreamCursor) -> Batch {
        let state = self.lock();
        let mut batch = Batch::default();

        if cursor.revision != state.revision {
            cursor.revision = state.revision;
            cursor.next_id = state.oldest_id().unwrap_or(1);
            batch.cleared = true;
        }

        if let Some(oldest) = state.oldest_id() {
            cursor.next_id = cursor.next_id.max(oldest);
            let start = usize::try_from(cursor.next_id - oldest).unwrap_or(usize::MAX);
            batch.records.extend(state.records.iter().skip(start).cloned());
        }
        if let Some(last) = batch.records.last() {
            cursor.next_id = last.id + 1;
        }
        batch
    }

    fn notify(&self) {
        self.shared.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
