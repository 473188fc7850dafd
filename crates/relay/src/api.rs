// Publish and clear endpoints.

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use chatfeed_common::protocol::stream::{ClearResponse, PublishRequest, PublishResponse};
use tracing::info;

use crate::error::{ErrorCode, RelayError};
use crate::RelayState;

/// `POST /messages`
pub async fn publish(
    State(state): State<RelayState>,
    payload: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<PublishResponse>, RelayError> {
    let Json(request) =
        payload.map_err(|rejection| RelayError::from_status(rejection.status(), rejection.body_text()))?;

    if request.message.trim().is_empty() && request.name.as_deref().map_or(true, str::is_empty) {
        return Err(RelayError::new(ErrorCode::ValidationFailed, "message and name are both empty"));
    }

    let record = state.log.publish(request);
    Ok(Json(PublishResponse { id: record.id }))
}

/// `POST /clear-messages`
pub async fn clear(State(state): State<RelayState>) -> Json<ClearResponse> {
    let revision = state.log.clear();
    info!(revision, "cleared all messages");
    Json(ClearResponse { success: true })
}

pub async fn healthz() -> &'static str {
    "ok"
}
