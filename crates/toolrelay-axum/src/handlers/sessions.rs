//! Session handlers: list and cancel active streaming sessions.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use toolrelay_core::RelayError;

use crate::error::HttpError;
use crate::state::AppState;

/// Ids of sessions currently held by the relay.
pub async fn list(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.relay.active_sessions())
}

/// Cancel a session from outside its socket.
pub async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, HttpError> {
    if state.relay.cancel(&session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RelayError::SessionNotFound(session_id).into())
    }
}
