//! Canonical event union for lifecycle notifications.
//!
//! Emitted through [`AppEventEmitter`](crate::ports::AppEventEmitter) and
//! forwarded to SSE subscribers by the HTTP adapter.
//!
//! # Structure
//!
//! - `server` - tool-server lifecycle events
//! - `session` - streaming session lifecycle events
//!
//! # Wire Format
//!
//! Events are serialized with a `type` tag:
//!
//! ```json
//! { "type": "server_started", "serverName": "calc-tool", "pid": 4242, "capabilityCount": 3 }
//! ```

mod server;
mod session;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::domain::SessionState;

/// Lifecycle events for all adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    // ========== Tool Server Events ==========
    /// A tool server finished discovery and is running.
    #[serde(rename_all = "camelCase")]
    ServerStarted {
        server_name: String,
        pid: Option<u32>,
        capability_count: usize,
    },

    /// A tool server was stopped, or exited cleanly on its own.
    #[serde(rename_all = "camelCase")]
    ServerStopped { server_name: String },

    /// A tool server failed to start or exited abnormally.
    #[serde(rename_all = "camelCase")]
    ServerError {
        server_name: String,
        kind: ErrorKind,
        message: String,
    },

    /// Capability list was replaced after a refresh.
    #[serde(rename_all = "camelCase")]
    CapabilitiesRefreshed {
        server_name: String,
        capability_count: usize,
    },

    // ========== Session Events ==========
    /// A streaming session was opened.
    #[serde(rename_all = "camelCase")]
    SessionOpened { session_id: String },

    /// A streaming session left the active map.
    #[serde(rename_all = "camelCase")]
    SessionClosed {
        session_id: String,
        final_state: SessionState,
    },
}

impl AppEvent {
    /// Get the event name for routing.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ServerStarted { .. } => "server:started",
            Self::ServerStopped { .. } => "server:stopped",
            Self::ServerError { .. } => "server:error",
            Self::CapabilitiesRefreshed { .. } => "server:capabilities",
            Self::SessionOpened { .. } => "session:opened",
            Self::SessionClosed { .. } => "session:closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_started_wire_format() {
        let event = AppEvent::server_started("calc-tool", Some(4242), 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "server_started");
        assert_eq!(json["serverName"], "calc-tool");
        assert_eq!(json["capabilityCount"], 3);
    }

    #[test]
    fn session_closed_roundtrip() {
        let event = AppEvent::session_closed("s1", SessionState::Completed);
        let json = serde_json::to_string(&event).unwrap();
        let back: AppEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.event_name(), "session:closed");
    }
}
