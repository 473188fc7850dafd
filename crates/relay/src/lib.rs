// chatfeed-relay: the push endpoint chat feed clients subscribe to.
//
// Publishers POST messages; subscribers read `/stream`. Everything lives in
// one bounded in-memory log.

pub mod api;
pub mod config;
pub mod cors;
pub mod error;
pub mod log;
pub mod sse;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chatfeed_common::protocol::stream::{CLEAR_PATH, PUBLISH_PATH, STREAM_PATH};
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{RelayConfig, DEFAULT_HEARTBEAT_SECS, DEFAULT_RETRY_MS};
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};
use crate::log::MessageLog;

pub use crate::error::REQUEST_ID_HEADER;

pub const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Per-subscriber stream timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    pub heartbeat_interval: Duration,
    pub retry: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            retry: Duration::from_millis(DEFAULT_RETRY_MS),
        }
    }
}

/// Shared router state.
#[derive(Debug, Clone)]
pub struct RelayState {
    pub log: MessageLog,
    pub settings: StreamSettings,
    closing: Arc<watch::Sender<bool>>,
}

impl RelayState {
    pub fn new(log: MessageLog, settings: StreamSettings) -> Self {
        let (closing, _) = watch::channel(false);
        Self { log, settings, closing: Arc::new(closing) }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            MessageLog::new(config.max_messages),
            StreamSettings { heartbeat_interval: config.heartbeat_interval, retry: config.retry },
        )
    }

    /// End every open stream so graceful shutdown can finish.
    pub fn begin_shutdown(&self) {
        self.closing.send_replace(true);
    }

    pub(crate) fn closing(&self) -> watch::Receiver<bool> {
        self.closing.subscribe()
    }
}

pub fn build_router(state: RelayState, cors_origins: Option<&str>) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(api::healthz))
            .route(STREAM_PATH, get(sse::stream))
            .route(PUBLISH_PATH, post(api::publish))
            .route(CLEAR_PATH, post(api::clear))
            .with_state(state)
            .layer(cors::cors_layer(cors_origins)),
    )
}

pub fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    // For `/stream` this marks when headers went out, not when it closed.
    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
