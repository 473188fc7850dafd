// SSE transport over reqwest + eventsource-stream.
//
// Each `open` spawns one reader task on the current tokio runtime. The task
// forwards lifecycle signals over an unbounded channel, tagged with the
// connection id it was started for; it never touches manager state.

use chatfeed_common::protocol::stream::{
    EventId, LAST_EVENT_ID_HEADER, RESUME_QUERY_PARAM, STREAM_PATH,
};
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::config::endpoint_url;

use super::{ConnectionId, RawEvent, SignalEnvelope, StreamTransport, TransportError, TransportSignal};

pub type SignalSender = mpsc::UnboundedSender<SignalEnvelope>;
pub type SignalReceiver = mpsc::UnboundedReceiver<SignalEnvelope>;

pub struct SseTransport {
    client: reqwest::Client,
    stream_url: Url,
    signals: SignalSender,
    next_id: u64,
    task: Option<JoinHandle<()>>,
}

impl SseTransport {
    pub fn new(server_url: &Url, signals: SignalSender) -> Result<Self, TransportError> {
        Ok(Self {
            client: reqwest::Client::new(),
            stream_url: endpoint_url(server_url, STREAM_PATH)?,
            signals,
            next_id: 0,
            task: None,
        })
    }

    /// A channel pair suitable for `new`.
    pub fn channel() -> (SignalSender, SignalReceiver) {
        mpsc::unbounded_channel()
    }

    /// Stream URL with the resume cursor in the query string.
    pub fn request_url(&self, resume: Option<EventId>) -> Url {
        let mut url = self.stream_url.clone();
        if let Some(id) = resume {
            url.query_pairs_mut().append_pair(RESUME_QUERY_PARAM, &id.to_string());
        }
        url
    }
}

impl StreamTransport for SseTransport {
    fn open(&mut self, resume: Option<EventId>) -> Result<ConnectionId, TransportError> {
        self.close();
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        self.next_id += 1;
        let conn = ConnectionId(self.next_id);

        let mut request = self
            .client
            .get(self.request_url(resume))
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = resume {
            request = request.header(LAST_EVENT_ID_HEADER, id.to_string());
        }

        self.task = Some(runtime.spawn(read_stream(conn, request, self.signals.clone())));
        Ok(conn)
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.task.as_ref().is_some_and(JoinHandle::is_finished)
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn emit(signals: &SignalSender, conn: ConnectionId, signal: TransportSignal) {
    // The receiver only goes away when the runtime is shutting down.
    let _ = signals.send(SignalEnvelope { conn, signal });
}

fn terminal(reason: impl Into<String>) -> TransportSignal {
    TransportSignal::Error { terminal: true, reason: reason.into() }
}

async fn read_stream(conn: ConnectionId, request: reqwest::RequestBuilder, signals: SignalSender) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(error) => {
            emit(&signals, conn, terminal(format!("request failed: {error}")));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        emit(&signals, conn, terminal(format!("unexpected status {status}")));
        return;
    }
    emit(&signals, conn, TransportSignal::Open);

    let mut events = response.bytes_stream().eventsource();
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                let raw = RawEvent { event_type: event.event, data: event.data, last_event_id: event.id };
                emit(&signals, conn, TransportSignal::Event(raw));
            }
            Err(EventStreamError::Transport(error)) => {
                emit(&signals, conn, terminal(format!("stream interrupted: {error}")));
                return;
            }
            Err(error) => {
                debug!(%conn, %error, "undecodable SSE frame");
                let reason = error.to_string();
                emit(&signals, conn, TransportSignal::Error { terminal: false, reason });
            }
        }
    }

    emit(&signals, conn, terminal("stream ended"));
}
