//! Error kinds shared by the supervisor and the relay.
//!
//! Control-surface calls never return these across their boundary; they are
//! folded into a [`StatusSnapshot`](crate::StatusSnapshot) carrying the
//! stable [`ErrorKind`]. The relay turns them into in-band `error` events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable discriminant for every failure the core can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigNotFound,
    /// Reported as success by `start`.
    AlreadyRunning,
    InvalidConfig,
    SpawnFailure,
    DiscoveryTimeout,
    DiscoveryParseError,
    TerminationFailure,
    NotRunning,
    SessionNotFound,
    DuplicateSession,
    UpstreamDisconnected,
    TransportError,
    InvalidRequest,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigNotFound => "config_not_found",
            Self::AlreadyRunning => "already_running",
            Self::InvalidConfig => "invalid_config",
            Self::SpawnFailure => "spawn_failure",
            Self::DiscoveryTimeout => "discovery_timeout",
            Self::DiscoveryParseError => "discovery_parse_error",
            Self::TerminationFailure => "termination_failure",
            Self::NotRunning => "not_running",
            Self::SessionNotFound => "session_not_found",
            Self::DuplicateSession => "duplicate_session",
            Self::UpstreamDisconnected => "upstream_disconnected",
            Self::TransportError => "transport_error",
            Self::InvalidRequest => "invalid_request",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised inside the process supervisor and discovery client.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("Server configuration '{0}' not found")]
    ConfigNotFound(String),

    #[error("Server '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to spawn server process: {0}")]
    SpawnFailure(String),

    #[error("Discovery timed out after {0}s")]
    DiscoveryTimeout(u64),

    #[error("Malformed discovery response: {0}")]
    DiscoveryParseError(String),

    #[error("Failed to terminate server process: {0}")]
    TerminationFailure(String),

    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SupervisorError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigNotFound(_) => ErrorKind::ConfigNotFound,
            Self::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::SpawnFailure(_) => ErrorKind::SpawnFailure,
            Self::DiscoveryTimeout(_) => ErrorKind::DiscoveryTimeout,
            Self::DiscoveryParseError(_) => ErrorKind::DiscoveryParseError,
            Self::TerminationFailure(_) => ErrorKind::TerminationFailure,
            Self::NotRunning(_) => ErrorKind::NotRunning,
            Self::Transport(_) => ErrorKind::TransportError,
        }
    }
}

/// Errors raised by the streaming session relay.
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("Session '{0}' already has an active connection")]
    DuplicateSession(String),

    #[error("Upstream disconnected: {0}")]
    UpstreamDisconnected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RelayError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::DuplicateSession(_) => ErrorKind::DuplicateSession,
            Self::UpstreamDisconnected(_) => ErrorKind::UpstreamDisconnected,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Whether the client may retry on the same connection.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::DuplicateSession(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::DiscoveryParseError).unwrap();
        assert_eq!(json, "\"discovery_parse_error\"");
        assert_eq!(ErrorKind::DiscoveryParseError.to_string(), "discovery_parse_error");
    }

    #[test]
    fn supervisor_error_kinds() {
        assert_eq!(
            SupervisorError::DiscoveryTimeout(30).kind(),
            ErrorKind::DiscoveryTimeout
        );
        assert_eq!(
            SupervisorError::Transport("pipe closed".into()).kind(),
            ErrorKind::TransportError
        );
        assert_eq!(
            SupervisorError::ConfigNotFound("calc".into()).to_string(),
            "Server configuration 'calc' not found"
        );
    }

    #[test]
    fn relay_error_recoverability() {
        assert!(RelayError::InvalidRequest("empty prompt".into()).is_recoverable());
        assert!(!RelayError::UpstreamDisconnected("reset".into()).is_recoverable());
    }
}
