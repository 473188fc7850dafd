// Stream connection manager: server-push client with resume and reconnection.
//
// Keeps exactly one logical connection to the relay's `/stream` endpoint.
// Silent connections are caught by a heartbeat watchdog, failures are retried
// with geometric backoff, reconnects resume from the last acknowledged id,
// and redelivered events are filtered through a bounded dedup cache.
//
// Transport is abstracted via `StreamTransport` for testability. Time is
// passed in explicitly; timers are deadlines the runtime sleeps towards.

pub mod backoff;
pub mod dedup;
pub mod heartbeat;
pub mod sse;

use std::fmt;
use std::time::{Duration, Instant};

use chatfeed_common::protocol::stream::{parse_event_id, EventId, StreamPayload, HEARTBEAT_EVENT};
use tracing::{debug, info, trace, warn};

use self::backoff::{
    Backoff, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS,
};
use self::dedup::{DedupCache, DEFAULT_DEDUP_CAPACITY};
use self::heartbeat::{HeartbeatClock, DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_WATCHDOG_INTERVAL_MS};

// ── Policy ──────────────────────────────────────────────────────────

/// Timing and sizing parameters for the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPolicy {
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub heartbeat_timeout: Duration,
    pub watchdog_interval: Duration,
    pub dedup_capacity: usize,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            heartbeat_timeout: Duration::from_millis(DEFAULT_HEARTBEAT_TIMEOUT_MS),
            watchdog_interval: Duration::from_millis(DEFAULT_WATCHDOG_INTERVAL_MS),
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
        }
    }
}

// ── Transport trait ─────────────────────────────────────────────────

/// Generation tag for one transport open. Signals from an older generation
/// are ignored by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no async runtime available to drive the stream")]
    NoRuntime,
    #[error("invalid stream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// One server-sent event as decoded by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// SSE `event:` field; empty means the default `message` type.
    pub event_type: String,
    pub data: String,
    /// SSE `id:` field; empty when the server sent none.
    pub last_event_id: String,
}

impl RawEvent {
    pub fn message(data: impl Into<String>) -> Self {
        Self { data: data.into(), ..Self::default() }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = id.into();
        self
    }

    pub fn heartbeat() -> Self {
        Self { event_type: HEARTBEAT_EVENT.to_string(), ..Self::default() }
    }

    fn is_message(&self) -> bool {
        self.event_type.is_empty() || self.event_type == "message"
    }
}

/// Lifecycle notifications from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Open,
    Event(RawEvent),
    /// `terminal` means the transport gave up and will not retry on its own.
    Error { terminal: bool, reason: String },
}

/// A signal tagged with the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEnvelope {
    pub conn: ConnectionId,
    pub signal: TransportSignal,
}

/// Abstraction over the push channel.
///
/// In production this is `SseTransport` (reqwest + eventsource-stream).
/// In tests it is a mock that records opens and closes.
pub trait StreamTransport {
    /// Open a new connection, passing the resume cursor if one exists.
    fn open(&mut self, resume: Option<EventId>) -> Result<ConnectionId, TransportError>;

    /// Close the current connection, if any.
    fn close(&mut self);

    /// Whether the current connection has ended without its terminal signal
    /// having been handled yet.
    fn is_closed(&self) -> bool;
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ReconnectScheduled,
}

/// What the manager decided about one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDisposition {
    /// From a connection that is no longer current.
    Stale,
    Heartbeat,
    /// Event type the client does not consume.
    Ignored,
    Malformed,
    /// Full reset: callers drop all rendered state.
    Clear,
    Duplicate(EventId),
    Deliver(StreamPayload),
}

// ── Connection manager ──────────────────────────────────────────────

pub struct StreamConnectionManager<T: StreamTransport> {
    transport: T,
    policy: StreamPolicy,
    state: ConnectionState,
    active: Option<ConnectionId>,
    resume_cursor: Option<EventId>,
    dedup: DedupCache,
    backoff: Backoff,
    heartbeat: HeartbeatClock,
    reconnect_at: Option<Instant>,
    watchdog_at: Option<Instant>,
}

impl<T: StreamTransport> StreamConnectionManager<T> {
    pub fn new(transport: T, policy: StreamPolicy, now: Instant) -> Self {
        let backoff =
            Backoff::new(policy.initial_backoff, policy.backoff_multiplier, policy.max_backoff);
        Self {
            transport,
            dedup: DedupCache::new(policy.dedup_capacity),
            heartbeat: HeartbeatClock::new(now, policy.heartbeat_timeout),
            backoff,
            policy,
            state: ConnectionState::Disconnected,
            active: None,
            resume_cursor: None,
            reconnect_at: None,
            watchdog_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.active
    }

    pub fn resume_cursor(&self) -> Option<EventId> {
        self.resume_cursor
    }

    pub fn dedup(&self) -> &DedupCache {
        &self.dedup
    }

    pub fn current_backoff(&self) -> Duration {
        self.backoff.current()
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog_at
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.reconnect_at, self.watchdog_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Open a connection unless one is already open or opening.
    pub fn start(&mut self, now: Instant) {
        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            return;
        }
        self.reconnect_at = None;
        self.open_transport(now);
        self.arm_watchdog(now);
    }

    /// Tear everything down and connect again right away with the backoff
    /// at its floor.
    pub fn force_reconnect(&mut self, now: Instant) {
        info!(state = ?self.state, "forcing stream reconnect");
        self.teardown_transport();
        self.reconnect_at = None;
        self.backoff.reset();
        self.open_transport(now);
        self.arm_watchdog(now);
    }

    /// Drop the current connection and arm the reconnect deadline. At most
    /// one reconnect is ever pending; later calls only tear down.
    pub fn schedule_reconnect(&mut self, immediate: bool, now: Instant) {
        self.teardown_transport();
        if self.reconnect_at.is_some() {
            return;
        }

        let delay = if immediate { Duration::ZERO } else { self.backoff.current() };
        self.reconnect_at = Some(now + delay);
        self.state = ConnectionState::ReconnectScheduled;
        debug!(delay_ms = delay.as_millis() as u64, immediate, "stream reconnect scheduled");

        if immediate {
            self.backoff.reset();
        } else {
            self.backoff.grow();
        }
    }

    /// Re-check the connection when the consumer regains attention.
    pub fn ensure_active(&mut self, force: bool, now: Instant) {
        if force {
            self.force_reconnect(now);
        } else if self.active.is_none() {
            self.start(now);
        } else if self.transport.is_closed() {
            self.schedule_reconnect(true, now);
        }
    }

    pub fn on_open(&mut self, conn: ConnectionId, now: Instant) {
        if !self.is_current(conn) {
            trace!(%conn, "ignoring open from stale connection");
            return;
        }
        self.heartbeat.beat(now);
        self.backoff.reset();
        self.reconnect_at = None;
        self.state = ConnectionState::Connected;
        info!(%conn, resume = ?self.resume_cursor, "stream opened");
    }

    pub fn on_event(&mut self, conn: ConnectionId, event: &RawEvent, now: Instant) -> EventDisposition {
        if !self.is_current(conn) {
            trace!(%conn, "ignoring event from stale connection");
            return EventDisposition::Stale;
        }
        self.heartbeat.beat(now);

        if event.event_type == HEARTBEAT_EVENT {
            return EventDisposition::Heartbeat;
        }
        if !event.is_message() {
            trace!(event_type = %event.event_type, "ignoring unknown event type");
            return EventDisposition::Ignored;
        }

        let payload = match StreamPayload::from_json(&event.data) {
            Ok(payload) => payload,
            Err(error) => {
                debug!(%error, "dropping malformed stream payload");
                return EventDisposition::Malformed;
            }
        };

        if payload.clear {
            info!("server cleared message history");
            self.clear_history();
            return EventDisposition::Clear;
        }

        if let Some(id) = parse_event_id(&event.last_event_id) {
            self.resume_cursor = Some(id);
        }

        if let Some(id) = payload.event_id() {
            if self.dedup.seen(id) {
                trace!(id, "dropping redelivered event");
                return EventDisposition::Duplicate(id);
            }
            self.dedup.record(id);
            self.resume_cursor = Some(id);
        }

        EventDisposition::Deliver(payload)
    }

    pub fn on_error(&mut self, conn: ConnectionId, terminal: bool, reason: &str, now: Instant) {
        if !self.is_current(conn) {
            trace!(%conn, "ignoring error from stale connection");
            return;
        }
        if terminal {
            warn!(%conn, reason, "stream closed, scheduling reconnect");
            self.schedule_reconnect(false, now);
        } else {
            debug!(%conn, reason, "recoverable stream error");
        }
    }

    /// Route one transport signal.
    pub fn handle_signal(&mut self, envelope: &SignalEnvelope, now: Instant) -> Option<EventDisposition> {
        match &envelope.signal {
            TransportSignal::Open => {
                self.on_open(envelope.conn, now);
                None
            }
            TransportSignal::Event(event) => Some(self.on_event(envelope.conn, event, now)),
            TransportSignal::Error { terminal, reason } => {
                self.on_error(envelope.conn, *terminal, reason, now);
                None
            }
        }
    }

    /// Fire due timers: the watchdog first, then the reconnect deadline, so
    /// a watchdog trip reconnects within the same poll.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.watchdog_at.is_some_and(|at| at <= now) {
            self.watchdog_at = Some(now + self.policy.watchdog_interval);
            self.check_heartbeat(now);
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            debug!("reconnect deadline fired");
            self.open_transport(now);
        }
    }

    /// Forget delivered ids and the resume cursor (user-issued clear).
    pub fn clear_history(&mut self) {
        self.dedup.clear();
        self.resume_cursor = None;
    }

    /// Close the transport and cancel every timer.
    pub fn shutdown(&mut self) {
        self.teardown_transport();
        self.reconnect_at = None;
        self.watchdog_at = None;
        self.state = ConnectionState::Disconnected;
        info!("stream manager shut down");
    }

    // ── Internals ───────────────────────────────────────────────────

    fn is_current(&self, conn: ConnectionId) -> bool {
        self.active == Some(conn)
    }

    fn check_heartbeat(&mut self, now: Instant) {
        if self.active.is_none() {
            return;
        }
        if self.heartbeat.is_stale(now) {
            warn!(
                silence_ms = self.heartbeat.silence(now).as_millis() as u64,
                "stream went silent, reconnecting"
            );
            self.schedule_reconnect(true, now);
        }
    }

    fn arm_watchdog(&mut self, now: Instant) {
        if self.watchdog_at.is_none() {
            self.watchdog_at = Some(now + self.policy.watchdog_interval);
        }
    }

    fn teardown_transport(&mut self) {
        if let Some(conn) = self.active.take() {
            debug!(%conn, "closing stream transport");
            self.transport.close();
        }
    }

    /// Silence is measured from the attempt start until the first open, so a
    /// slow handshake is not mistaken for a dead connection.
    fn open_transport(&mut self, now: Instant) {
        self.teardown_transport();
        self.state = ConnectionState::Connecting;
        self.heartbeat.beat(now);

        match self.transport.open(self.resume_cursor) {
            Ok(conn) => {
                debug!(%conn, resume = ?self.resume_cursor, "stream transport opening");
                self.active = Some(conn);
            }
            Err(error) => {
                warn!(%error, "failed to construct stream transport");
                self.schedule_reconnect(false, now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Debug, Default)]
    struct MockTransport {
        next_id: u64,
        /// Resume hints passed to each open().
        opens: Vec<Option<EventId>>,
        closes: usize,
        /// Errors returned by upcoming open() calls, in order.
        open_errors: VecDeque<String>,
        closed: bool,
    }

    impl StreamTransport for MockTransport {
        fn open(&mut self, resume: Option<EventId>) -> Result<ConnectionId, TransportError> {
            self.opens.push(resume);
            if let Some(reason) = self.open_errors.pop_front() {
                return Err(TransportError::Unavailable(reason));
            }
            self.next_id += 1;
            self.closed = false;
            Ok(ConnectionId(self.next_id))
        }

        fn close(&mut self) {
            self.closes += 1;
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    fn manager(now: Instant) -> StreamConnectionManager<MockTransport> {
        StreamConnectionManager::new(MockTransport::default(), StreamPolicy::default(), now)
    }

    fn connected(now: Instant) -> (StreamConnectionManager<MockTransport>, ConnectionId) {
        let mut mgr = manager(now);
        mgr.start(now);
        let conn = mgr.active_connection().expect("start should open a transport");
        mgr.on_open(conn, now);
        (mgr, conn)
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn message(id: i64) -> RawEvent {
        RawEvent::message(format!(r#"{{"id":{id},"name":"alice","message":"hi"}}"#))
            .with_id(id.to_string())
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    #[test]
    fn start_opens_without_resume_hint_and_arms_watchdog() {
        let now = Instant::now();
        let mut mgr = manager(now);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);

        mgr.start(now);
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(mgr.transport().opens, vec![None]);
        assert_eq!(mgr.watchdog_deadline(), Some(now + ms(5_000)));
    }

    #[test]
    fn start_is_idempotent_while_connecting_or_connected() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.start(now);
        mgr.start(now);
        assert_eq!(mgr.transport().opens.len(), 1);

        let conn = mgr.active_connection().unwrap();
        mgr.on_open(conn, now);
        mgr.start(now);
        assert_eq!(mgr.transport().opens.len(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[test]
    fn open_resets_backoff_and_cancels_pending_reconnect() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_error(conn, true, "eof", now);
        assert_eq!(mgr.current_backoff(), ms(3_000));

        mgr.poll_timers(now + ms(2_000));
        let second = mgr.active_connection().unwrap();
        mgr.on_open(second, now + ms(2_100));

        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(mgr.current_backoff(), ms(2_000));
        assert_eq!(mgr.reconnect_deadline(), None);
    }

    #[test]
    fn shutdown_cancels_timers_and_closes_transport() {
        let now = Instant::now();
        let (mut mgr, _) = connected(now);
        mgr.shutdown();

        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(mgr.next_deadline(), None);
        assert_eq!(mgr.transport().closes, 1);
        assert_eq!(mgr.active_connection(), None);
    }

    // ── Backoff ─────────────────────────────────────────────────────

    #[test]
    fn consecutive_failures_follow_geometric_delays() {
        let mut now = Instant::now();
        let mut mgr = manager(now);
        mgr.start(now);

        let expected = [2_000, 3_000, 4_500, 6_750, 10_125, 15_000, 15_000];
        for delay in expected {
            let conn = mgr.active_connection().unwrap();
            mgr.on_error(conn, true, "refused", now);
            assert_eq!(mgr.state(), ConnectionState::ReconnectScheduled);
            let deadline = mgr.reconnect_deadline().unwrap();
            assert_eq!(deadline - now, ms(delay));

            now = deadline;
            mgr.poll_timers(now);
            assert_eq!(mgr.state(), ConnectionState::Connecting);
        }
    }

    #[test]
    fn force_reconnect_resets_backoff_after_failures() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_error(conn, true, "eof", now);
        mgr.poll_timers(now + ms(2_000));
        let conn = mgr.active_connection().unwrap();
        mgr.on_error(conn, true, "eof", now + ms(2_000));
        assert_eq!(mgr.current_backoff(), ms(4_500));

        mgr.force_reconnect(now + ms(2_500));
        assert_eq!(mgr.current_backoff(), ms(2_000));
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert_eq!(mgr.reconnect_deadline(), None);
        assert_eq!(mgr.transport().opens.len(), 3);
    }

    #[test]
    fn schedule_reconnect_keeps_a_single_pending_deadline() {
        let now = Instant::now();
        let (mut mgr, _) = connected(now);
        mgr.schedule_reconnect(false, now);
        let first = mgr.reconnect_deadline();
        let backoff = mgr.current_backoff();

        mgr.schedule_reconnect(false, now + ms(100));
        mgr.schedule_reconnect(true, now + ms(200));
        assert_eq!(mgr.reconnect_deadline(), first);
        assert_eq!(mgr.current_backoff(), backoff);
    }

    #[test]
    fn immediate_reconnect_resets_backoff() {
        let now = Instant::now();
        let (mut mgr, _) = connected(now);
        mgr.schedule_reconnect(true, now);
        assert_eq!(mgr.reconnect_deadline(), Some(now));
        assert_eq!(mgr.current_backoff(), ms(2_000));
    }

    #[test]
    fn construction_failure_schedules_backoff_reconnect() {
        let now = Instant::now();
        let mut transport = MockTransport::default();
        transport.open_errors.push_back("dns".to_string());
        let mut mgr = StreamConnectionManager::new(transport, StreamPolicy::default(), now);

        mgr.start(now);
        assert_eq!(mgr.state(), ConnectionState::ReconnectScheduled);
        assert_eq!(mgr.reconnect_deadline(), Some(now + ms(2_000)));
        assert_eq!(mgr.active_connection(), None);

        mgr.poll_timers(now + ms(2_000));
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert!(mgr.active_connection().is_some());
    }

    #[test]
    fn recoverable_errors_are_ignored() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_error(conn, false, "utf8", now);
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(mgr.reconnect_deadline(), None);
    }

    // ── Watchdog ────────────────────────────────────────────────────

    #[test]
    fn watchdog_does_not_trip_before_threshold() {
        let t = Instant::now();
        let (mut mgr, _) = connected(t);
        mgr.poll_timers(t + ms(19_999));
        assert_eq!(mgr.state(), ConnectionState::Connected);
        assert_eq!(mgr.transport().opens.len(), 1);
    }

    #[test]
    fn watchdog_trips_exactly_once_past_threshold() {
        let t = Instant::now();
        let (mut mgr, _) = connected(t);
        mgr.poll_timers(t + ms(20_001));

        assert_eq!(mgr.transport().opens.len(), 2, "one immediate reconnect");
        assert_eq!(mgr.state(), ConnectionState::Connecting);

        mgr.poll_timers(t + ms(20_002));
        assert_eq!(mgr.transport().opens.len(), 2);
        assert_eq!(mgr.watchdog_deadline(), Some(t + ms(25_001)));
    }

    #[test]
    fn watchdog_is_idle_without_a_transport() {
        let t = Instant::now();
        let policy = StreamPolicy { initial_backoff: ms(30_000), ..StreamPolicy::default() };
        let mut mgr = StreamConnectionManager::new(MockTransport::default(), policy, t);
        mgr.start(t);
        let conn = mgr.active_connection().unwrap();
        mgr.on_error(conn, true, "eof", t);
        let pending = mgr.reconnect_deadline();

        // Silent for longer than the threshold, but only a backoff is pending.
        mgr.poll_timers(t + ms(25_000));
        assert_eq!(mgr.reconnect_deadline(), pending);
        assert_eq!(mgr.state(), ConnectionState::ReconnectScheduled);
        assert_eq!(mgr.transport().opens.len(), 1);
    }

    #[test]
    fn heartbeats_keep_the_connection_alive() {
        let t = Instant::now();
        let (mut mgr, conn) = connected(t);
        for step in 1..=8u64 {
            let now = t + ms(step * 5_000);
            assert_eq!(mgr.on_event(conn, &RawEvent::heartbeat(), now), EventDisposition::Heartbeat);
            mgr.poll_timers(now);
        }
        assert_eq!(mgr.transport().opens.len(), 1);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    // ── Events ──────────────────────────────────────────────────────

    #[test]
    fn delivered_events_advance_resume_cursor() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        let disposition = mgr.on_event(conn, &message(5), now);
        assert!(matches!(disposition, EventDisposition::Deliver(ref p) if p.event_id() == Some(5)));
        assert_eq!(mgr.resume_cursor(), Some(5));

        mgr.on_error(conn, true, "eof", now);
        mgr.poll_timers(now + ms(2_000));
        assert_eq!(mgr.transport().opens, vec![None, Some(5)]);
    }

    #[test]
    fn redelivered_ids_are_dropped_but_still_move_the_cursor() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_event(conn, &message(3), now);
        mgr.on_event(conn, &message(4), now);

        let redelivered = RawEvent::message(r#"{"id":3,"message":"again"}"#).with_id("3");
        assert_eq!(mgr.on_event(conn, &redelivered, now), EventDisposition::Duplicate(3));
        assert_eq!(mgr.resume_cursor(), Some(3));
    }

    #[test]
    fn malformed_payload_is_dropped_without_reconnect() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        assert_eq!(mgr.on_event(conn, &RawEvent::message("{oops"), now), EventDisposition::Malformed);
        assert_eq!(mgr.state(), ConnectionState::Connected);
    }

    #[test]
    fn clear_with_odd_sibling_fields_still_resets() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_event(conn, &message(1), now);

        let clear = RawEvent::message(r#"{"clear":true,"name":5}"#);
        assert_eq!(mgr.on_event(conn, &clear, now), EventDisposition::Clear);
        assert!(mgr.dedup().is_empty());
    }

    #[test]
    fn ill_typed_optional_fields_do_not_drop_the_message() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        let event = RawEvent::message(r#"{"id":2,"name":"bob","message":"hi","time":1234}"#).with_id("2");
        match mgr.on_event(conn, &event, now) {
            EventDisposition::Deliver(payload) => {
                assert_eq!(payload.message_text(), "hi");
                assert_eq!(payload.time.as_deref(), Some("1234"));
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        assert_eq!(mgr.resume_cursor(), Some(2));
    }

    #[test]
    fn non_object_payload_is_malformed() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        assert_eq!(mgr.on_event(conn, &RawEvent::message("[1,2]"), now), EventDisposition::Malformed);
    }

    #[test]
    fn events_without_ids_are_always_delivered() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        let event = RawEvent::message(r#"{"id":"not-a-number","message":"hi"}"#);
        for _ in 0..2 {
            assert!(matches!(mgr.on_event(conn, &event, now), EventDisposition::Deliver(_)));
        }
        assert!(mgr.dedup().is_empty());
        assert_eq!(mgr.resume_cursor(), None);
    }

    #[test]
    fn clear_resets_dedup_and_cursor() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_event(conn, &message(1), now);

        let clear = RawEvent::message(r#"{"clear": true}"#);
        assert_eq!(mgr.on_event(conn, &clear, now), EventDisposition::Clear);
        assert_eq!(mgr.resume_cursor(), None);
        assert!(mgr.dedup().is_empty());

        assert!(matches!(mgr.on_event(conn, &message(1), now), EventDisposition::Deliver(_)));
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        let event = RawEvent { event_type: "presence".into(), data: "{}".into(), ..RawEvent::default() };
        assert_eq!(mgr.on_event(conn, &event, now), EventDisposition::Ignored);
    }

    #[test]
    fn stale_connection_signals_are_ignored() {
        let now = Instant::now();
        let (mut mgr, old) = connected(now);
        mgr.force_reconnect(now);
        let current = mgr.active_connection().unwrap();
        assert_ne!(old, current);

        assert_eq!(mgr.on_event(old, &message(1), now), EventDisposition::Stale);
        mgr.on_error(old, true, "late eof", now);
        assert_eq!(mgr.reconnect_deadline(), None);
        mgr.on_open(old, now);
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    // ── ensure_active ───────────────────────────────────────────────

    #[test]
    fn ensure_active_starts_when_idle() {
        let now = Instant::now();
        let mut mgr = manager(now);
        mgr.ensure_active(false, now);
        assert_eq!(mgr.state(), ConnectionState::Connecting);
    }

    #[test]
    fn ensure_active_reconnects_closed_transport() {
        let now = Instant::now();
        let (mut mgr, _) = connected(now);
        mgr.transport.closed = true;
        mgr.ensure_active(false, now);
        assert_eq!(mgr.state(), ConnectionState::ReconnectScheduled);
        assert_eq!(mgr.reconnect_deadline(), Some(now));
    }

    #[test]
    fn ensure_active_leaves_healthy_connection_alone() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.ensure_active(false, now);
        assert_eq!(mgr.active_connection(), Some(conn));
    }

    #[test]
    fn ensure_active_force_always_reconnects() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.ensure_active(true, now);
        assert_ne!(mgr.active_connection(), Some(conn));
        assert_eq!(mgr.transport().closes, 1);
    }

    #[test]
    fn clear_history_forgets_cursor() {
        let now = Instant::now();
        let (mut mgr, conn) = connected(now);
        mgr.on_event(conn, &message(9), now);
        mgr.clear_history();
        mgr.force_reconnect(now);
        assert_eq!(mgr.transport().opens.last(), Some(&None));
    }
}
