// `GET /stream`: replay and live-tail the message log as server-sent events.
//
// Each subscriber gets a `retry:` hint first, then everything after its
// resume point. A clear is announced with `{"clear":true}` before the
// post-clear records. After a quiet heartbeat interval a `heartbeat` event
// carries the server's unix time so clients can tell a live idle stream
// from a dead one.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName},
    response::{
        sse::{Event, Sse},
        IntoResponse,
    },
};
use chatfeed_common::protocol::stream::{EventId, HEARTBEAT_EVENT, LAST_EVENT_ID_HEADER};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::log::{Batch, MessageLog, StreamCursor};
use crate::RelayState;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// `?last_event_id=N`, for clients that cannot set the resume header.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    last_event_id: Option<String>,
}

pub async fn stream(
    State(state): State<RelayState>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let header_value = headers.get(LAST_EVENT_ID_HEADER).and_then(|value| value.to_str().ok());
    let resume = resume_point(header_value, query.last_event_id.as_deref());
    let cursor = state.log.cursor(resume);
    debug!(?resume, next_id = cursor.next_id, "stream subscriber connected");

    let events = event_stream(EventStreamState::new(&state, cursor));
    (
        [(header::CACHE_CONTROL, "no-cache"), (X_ACCEL_BUFFERING, "no")],
        Sse::new(events),
    )
}

/// First candidate that parses as an integer, header before query. Blank or
/// unparsable values are skipped.
pub fn resume_point(header: Option<&str>, query: Option<&str>) -> Option<EventId> {
    [header, query]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .find_map(|candidate| candidate.parse().ok())
}

struct EventStreamState {
    log: MessageLog,
    cursor: StreamCursor,
    changes: watch::Receiver<u64>,
    closing: watch::Receiver<bool>,
    heartbeat: Duration,
    pending: VecDeque<Event>,
}

impl EventStreamState {
    fn new(state: &RelayState, cursor: StreamCursor) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(Event::default().retry(state.settings.retry));
        Self {
            log: state.log.clone(),
            cursor,
            changes: state.log.subscribe(),
            closing: state.closing(),
            heartbeat: state.settings.heartbeat_interval,
            pending,
        }
    }

    fn queue(&mut self, batch: Batch) {
        if batch.cleared {
            self.pending.push_back(Event::default().data(json!({ "clear": true }).to_string()));
        }
        for record in batch.records {
            match Event::default().id(record.id.to_string()).json_data(record.to_payload()) {
                Ok(event) => self.pending.push_back(event),
                Err(error) => warn!(id = record.id, %error, "failed to encode stream payload"),
            }
        }
    }
}

fn event_stream(state: EventStreamState) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if *state.closing.borrow() {
                debug!("stream closing for shutdown");
                return None;
            }
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }

            // Mark the current version seen before reading so a publish that
            // lands after the drain still wakes the wait below.
            state.changes.borrow_and_update();
            let batch = state.log.drain(&mut state.cursor);
            if !batch.is_empty() {
                state.queue(batch);
                continue;
            }

            tokio::select! {
                changed = state.changes.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                closed = state.closing.changed() => {
                    if closed.is_err() {
                        return None;
                    }
                }
                _ = tokio::time::sleep(state.heartbeat) => {
                    state.pending.push_back(heartbeat_event());
                }
            }
        }
    })
}

fn heartbeat_event() -> Event {
    let ts = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    Event::default().event(HEARTBEAT_EVENT).data(json!({ "ts": ts }).to_string())
}
