//! Tool-server lifecycle event constructors.

use super::AppEvent;
use crate::error::ErrorKind;

impl AppEvent {
    pub fn server_started(
        server_name: impl Into<String>,
        pid: Option<u32>,
        capability_count: usize,
    ) -> Self {
        Self::ServerStarted {
            server_name: server_name.into(),
            pid,
            capability_count,
        }
    }

    pub fn server_stopped(server_name: impl Into<String>) -> Self {
        Self::ServerStopped {
            server_name: server_name.into(),
        }
    }

    pub fn server_error(
        server_name: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::ServerError {
            server_name: server_name.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn capabilities_refreshed(server_name: impl Into<String>, capability_count: usize) -> Self {
        Self::CapabilitiesRefreshed {
            server_name: server_name.into(),
            capability_count,
        }
    }
}
