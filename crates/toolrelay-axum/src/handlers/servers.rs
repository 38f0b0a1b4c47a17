//! Tool-server handlers: registry CRUD and the control operations.
//!
//! Control routes (`start`, `stop`, `status`, `refresh-capabilities`) always
//! answer with a [`StatusSnapshot`]. A failed operation is reported inside
//! the snapshot (`error_kind`, `message`); only an unknown name changes the
//! HTTP status, to 404.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use toolrelay_core::{ErrorKind, ServerDefinition, StatusSnapshot};

use crate::error::HttpError;
use crate::state::AppState;

type SnapshotResponse = (StatusCode, Json<StatusSnapshot>);

fn snapshot_response(snapshot: StatusSnapshot) -> SnapshotResponse {
    let status = if snapshot.error_kind == Some(ErrorKind::ConfigNotFound) {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    (status, Json(snapshot))
}

/// List every registered server with its live status.
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<StatusSnapshot>>, HttpError> {
    Ok(Json(state.service.list_statuses().await?))
}

/// Add or replace a server definition.
pub async fn register(
    State(state): State<AppState>,
    Json(definition): Json<ServerDefinition>,
) -> Result<(StatusCode, Json<StatusSnapshot>), HttpError> {
    let snapshot = state.service.register(definition).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Stop a server and remove its definition.
pub async fn remove(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StatusSnapshot>, HttpError> {
    Ok(Json(state.service.unregister(&name).await?))
}

pub async fn start(State(state): State<AppState>, Path(name): Path<String>) -> SnapshotResponse {
    snapshot_response(state.service.start(&name).await)
}

pub async fn stop(State(state): State<AppState>, Path(name): Path<String>) -> SnapshotResponse {
    snapshot_response(state.service.stop(&name).await)
}

pub async fn status(State(state): State<AppState>, Path(name): Path<String>) -> SnapshotResponse {
    snapshot_response(state.service.status(&name).await)
}

pub async fn refresh_capabilities(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> SnapshotResponse {
    snapshot_response(state.service.refresh_capabilities(&name).await)
}

/// Request body for invoking a tool on a running server.
#[derive(Debug, Deserialize)]
pub struct CallToolBody {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Invoke a tool on a running server and return its raw result.
pub async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<CallToolBody>,
) -> Result<Json<Value>, HttpError> {
    if body.tool.trim().is_empty() {
        return Err(HttpError::BadRequest("tool must not be empty".to_string()));
    }
    let arguments = if body.arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        body.arguments
    };
    Ok(Json(
        state
            .service
            .call_tool(&name, &body.tool, arguments)
            .await?,
    ))
}
