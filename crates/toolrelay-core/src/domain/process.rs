//! Live process state for supervised tool servers.
//!
//! [`ServerProcessRecord`] values are immutable once published: every state
//! change produces a complete new record, so a reader holding one never sees
//! a `pid` from one generation next to `capabilities` from another.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::server::{Capability, ServerDefinition, TransportKind};
use crate::error::ErrorKind;

/// Runtime status of a tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// No live process.
    #[default]
    Stopped,
    /// Spawned, waiting for readiness and discovery.
    Starting,
    /// Ready; capabilities discovered.
    Running,
    /// Termination requested.
    Stopping,
    /// Last start failed or the process exited abnormally.
    Error,
    /// State could not be determined (e.g. no such server).
    Unknown,
}

impl ServerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether a process may be alive in this state.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Complete live-state record for one server name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProcessRecord {
    pub name: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub transport: TransportKind,
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Present only while a process is live.
    pub pid: Option<u32>,
    pub status: ServerStatus,
    pub message: Option<String>,
    pub capabilities: Vec<Capability>,
    pub last_updated: DateTime<Utc>,
}

impl ServerProcessRecord {
    /// Fresh stopped record for a definition.
    pub fn new(definition: &ServerDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            command: definition.command.clone(),
            args: definition.args.clone(),
            transport: definition.transport,
            cwd: definition.cwd.clone(),
            env: definition.env.clone(),
            pid: None,
            status: ServerStatus::Stopped,
            message: None,
            capabilities: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    fn next(&self) -> Self {
        Self {
            last_updated: Utc::now(),
            ..self.clone()
        }
    }

    /// Same live state, launch fields taken from `definition`.
    #[must_use]
    pub fn with_definition(&self, definition: &ServerDefinition) -> Self {
        Self {
            command: definition.command.clone(),
            args: definition.args.clone(),
            transport: definition.transport,
            cwd: definition.cwd.clone(),
            env: definition.env.clone(),
            ..self.next()
        }
    }

    #[must_use]
    pub fn starting(&self) -> Self {
        Self {
            status: ServerStatus::Starting,
            message: Some("Server is starting".to_string()),
            ..self.next()
        }
    }

    /// Process spawned; capabilities not yet known.
    #[must_use]
    pub fn spawned(&self, pid: Option<u32>) -> Self {
        Self {
            pid,
            ..self.next()
        }
    }

    #[must_use]
    pub fn running(&self, pid: Option<u32>, capabilities: Vec<Capability>) -> Self {
        Self {
            pid,
            status: ServerStatus::Running,
            message: Some("Server is running".to_string()),
            capabilities,
            ..self.next()
        }
    }

    #[must_use]
    pub fn stopping(&self) -> Self {
        Self {
            status: ServerStatus::Stopping,
            message: Some("Server is stopping".to_string()),
            ..self.next()
        }
    }

    /// No live process. Clears `pid` and capabilities.
    #[must_use]
    pub fn stopped(&self, message: Option<String>) -> Self {
        Self {
            pid: None,
            status: ServerStatus::Stopped,
            message: message.or_else(|| Some("Server is stopped".to_string())),
            capabilities: Vec::new(),
            ..self.next()
        }
    }

    /// Failure state. Capabilities from the last good discovery are kept.
    #[must_use]
    pub fn errored(&self, message: impl Into<String>) -> Self {
        Self {
            pid: None,
            status: ServerStatus::Error,
            message: Some(message.into()),
            ..self.next()
        }
    }

    #[must_use]
    pub fn with_capabilities(&self, capabilities: Vec<Capability>) -> Self {
        Self {
            capabilities,
            ..self.next()
        }
    }

    #[must_use]
    pub fn with_message(&self, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..self.clone()
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let show_capabilities =
            self.status == ServerStatus::Running || !self.capabilities.is_empty();
        StatusSnapshot {
            name: self.name.clone(),
            status: self.status,
            message: self.message.clone(),
            pid: self.pid,
            discovered_capabilities: show_capabilities.then(|| self.capabilities.clone()),
            last_updated: self.last_updated,
            error_kind: None,
        }
    }
}

/// Shape returned by every control-surface call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub status: ServerStatus,
    pub message: Option<String>,
    pub pid: Option<u32>,
    pub discovered_capabilities: Option<Vec<Capability>>,
    pub last_updated: DateTime<Utc>,
    /// Set when the call that produced this snapshot failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StatusSnapshot {
    /// Snapshot with no live fields.
    pub fn new(name: impl Into<String>, status: ServerStatus) -> Self {
        Self {
            name: name.into(),
            status,
            message: None,
            pid: None,
            discovered_capabilities: None,
            last_updated: Utc::now(),
            error_kind: None,
        }
    }

    /// Snapshot for a name the registry does not know.
    pub fn not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            message: Some(format!("Server configuration '{name}' not found")),
            name,
            status: ServerStatus::Unknown,
            pid: None,
            discovered_capabilities: None,
            last_updated: Utc::now(),
            error_kind: Some(ErrorKind::ConfigNotFound),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub const fn with_error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// Whether the call that produced this snapshot failed.
    pub const fn is_failure(&self) -> bool {
        match self.error_kind {
            None | Some(ErrorKind::AlreadyRunning) => false,
            Some(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ServerProcessRecord {
        ServerProcessRecord::new(&ServerDefinition::stdio("calc-tool", "calc-server"))
    }

    #[test]
    fn stop_clears_live_fields() {
        let running = record().running(Some(42), vec![Capability::new("add")]);
        let stopped = running.stopped(None);

        assert_eq!(stopped.status, ServerStatus::Stopped);
        assert_eq!(stopped.pid, None);
        assert!(stopped.capabilities.is_empty());
        assert_eq!(stopped.command.as_deref(), Some("calc-server"));
    }

    #[test]
    fn error_retains_capabilities() {
        let running = record().running(Some(42), vec![Capability::new("add")]);
        let failed = running.errored("exited with status 1");

        assert_eq!(failed.status, ServerStatus::Error);
        assert_eq!(failed.pid, None);
        assert_eq!(failed.capabilities.len(), 1);
    }

    #[test]
    fn snapshot_serializes_null_pid() {
        let json = serde_json::to_value(record().stopped(None).snapshot()).unwrap();
        assert_eq!(json["status"], "stopped");
        assert!(json["pid"].is_null());
        assert!(json.get("error_kind").is_none());
    }

    #[test]
    fn running_snapshot_lists_capabilities() {
        let snap = record()
            .running(Some(7), vec![Capability::new("add").with_description("Add numbers")])
            .snapshot();
        let caps = snap.discovered_capabilities.unwrap();
        assert_eq!(caps[0].name, "add");
        assert_eq!(snap.pid, Some(7));
    }

    #[test]
    fn not_found_is_failure() {
        let snap = StatusSnapshot::not_found("ghost");
        assert_eq!(snap.status, ServerStatus::Unknown);
        assert!(snap.is_failure());
        assert!(!snap.with_error_kind(ErrorKind::AlreadyRunning).is_failure());
    }
}
