//! Axum-specific error types and mappings.
//!
//! Maps registry, supervisor and relay errors to HTTP status codes and a
//! JSON body of the form `{ "error": ..., "status": ..., "type": ... }`,
//! where `type` is the stable [`ErrorKind`] discriminant when one applies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use toolrelay_core::{ErrorKind, RegistryError, RelayError, SupervisorError};

/// Axum-specific error type.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A failure the core classified with an [`ErrorKind`].
    #[error("{message}")]
    Domain { kind: ErrorKind, message: String },

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HttpError {
    pub fn domain(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            message: message.into(),
        }
    }
}

/// HTTP status for a core error kind.
pub const fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ConfigNotFound | ErrorKind::SessionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidConfig | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::AlreadyRunning | ErrorKind::NotRunning | ErrorKind::DuplicateSession => {
            StatusCode::CONFLICT
        }
        ErrorKind::DiscoveryTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::DiscoveryParseError
        | ErrorKind::UpstreamDisconnected
        | ErrorKind::TransportError => StatusCode::BAD_GATEWAY,
        ErrorKind::SpawnFailure | ErrorKind::TerminationFailure => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
    /// Stable error type discriminant for client-side handling
    #[serde(skip_serializing_if = "Option::is_none", rename = "type")]
    error_type: Option<ErrorKind>,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message, error_type) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::Domain { kind, message } => (status_for_kind(kind), message, Some(kind)),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
            error_type,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<RegistryError> for HttpError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => Self::domain(
                ErrorKind::ConfigNotFound,
                format!("Server configuration '{name}' not found"),
            ),
            RegistryError::Invalid(msg) => Self::domain(ErrorKind::InvalidConfig, msg),
            RegistryError::Internal(msg) => Self::Internal(format!("Registry: {msg}")),
        }
    }
}

impl From<SupervisorError> for HttpError {
    fn from(err: SupervisorError) -> Self {
        Self::domain(err.kind(), err.to_string())
    }
}

impl From<RelayError> for HttpError {
    fn from(err: RelayError) -> Self {
        Self::domain(err.kind(), err.to_string())
    }
}
