//! Control surface for tool servers.
//!
//! Binds the configuration registry to the supervisor. The four control
//! operations (`start`, `stop`, `status`, `refresh_capabilities`) never return
//! an error: every outcome, including failures, is a [`StatusSnapshot`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use toolrelay_core::{
    AppEventEmitter, Capability, CapabilityCatalog, ErrorKind, RegistryError, ServerDefinition,
    ServerRegistry, ServerStatus, StatusSnapshot, SupervisorError, SupervisorSettings,
};
use tracing::{info, warn};

use crate::supervisor::ProcessSupervisor;

/// Registry-aware facade over the supervisor. Control operations never fail:
/// every outcome, including an unknown name, comes back as a [`StatusSnapshot`].
pub struct ToolServerService {
    registry: Arc<dyn ServerRegistry>,
    supervisor: Arc<ProcessSupervisor>,
}

impl ToolServerService {
    pub fn new(
        registry: Arc<dyn ServerRegistry>,
        settings: SupervisorSettings,
        emitter: Arc<dyn AppEventEmitter>,
    ) -> Self {
        Self::with_supervisor(registry, Arc::new(ProcessSupervisor::new(settings, emitter)))
    }

    pub const fn with_supervisor(
        registry: Arc<dyn ServerRegistry>,
        supervisor: Arc<ProcessSupervisor>,
    ) -> Self {
        Self {
            registry,
            supervisor,
        }
    }

    pub const fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub const fn registry(&self) -> &Arc<dyn ServerRegistry> {
        &self.registry
    }

    /// Look up a definition, folding registry failures into a snapshot.
    async fn definition(&self, name: &str) -> Result<ServerDefinition, StatusSnapshot> {
        match self.registry.get(name).await {
            Ok(def) => Ok(def),
            Err(RegistryError::NotFound(_)) => Err(StatusSnapshot::not_found(name)),
            Err(e) => {
                warn!(server_name = %name, error = %e, "Registry lookup failed");
                Err(StatusSnapshot::new(name, ServerStatus::Unknown)
                    .with_message(e.to_string())
                    .with_error_kind(ErrorKind::InvalidConfig))
            }
        }
    }

    /// Whether the supervisor holds state for a name the registry may have dropped.
    fn is_tracked(&self, name: &str) -> bool {
        self.supervisor.record(name).is_some()
    }

    // =========================================================================
    // Control operations
    // =========================================================================

    pub async fn start(&self, name: &str) -> StatusSnapshot {
        match self.definition(name).await {
            Ok(def) => self.supervisor.start(&def).await,
            Err(snapshot) => snapshot,
        }
    }

    pub async fn stop(&self, name: &str) -> StatusSnapshot {
        if !self.is_tracked(name) {
            if let Err(snapshot) = self.definition(name).await {
                return snapshot;
            }
        }
        self.supervisor.stop(name).await
    }

    pub async fn status(&self, name: &str) -> StatusSnapshot {
        if !self.is_tracked(name) {
            if let Err(snapshot) = self.definition(name).await {
                return snapshot;
            }
        }
        self.supervisor.status(name)
    }

    pub async fn refresh_capabilities(&self, name: &str) -> StatusSnapshot {
        if let Err(snapshot) = self.definition(name).await {
            return snapshot;
        }
        match self.supervisor.refresh_capabilities(name).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(server_name = %name, error = %e, "Capability refresh failed");
                self.supervisor
                    .status(name)
                    .with_message(format!("Capability refresh failed: {e}"))
                    .with_error_kind(e.kind())
            }
        }
    }

    // =========================================================================
    // Registry-facing operations
    // =========================================================================

    /// Status of every registered server, ordered by name.
    pub async fn list_statuses(&self) -> Result<Vec<StatusSnapshot>, RegistryError> {
        let definitions = self.registry.list().await?;
        Ok(definitions
            .iter()
            .map(|def| self.supervisor.status(&def.name))
            .collect())
    }

    pub async fn definitions(&self) -> Result<Vec<ServerDefinition>, RegistryError> {
        self.registry.list().await
    }

    /// Add or replace a definition. A running server keeps its process until
    /// the next stop/start.
    pub async fn register(&self, definition: ServerDefinition) -> Result<StatusSnapshot, RegistryError> {
        let name = definition.name.clone();
        self.registry.upsert(definition).await?;
        info!(server_name = %name, "Server registered");
        Ok(self.supervisor.status(&name))
    }

    /// Stop the server, drop its live record and remove its definition.
    pub async fn unregister(&self, name: &str) -> Result<StatusSnapshot, RegistryError> {
        self.registry.get(name).await?;
        let snapshot = self.supervisor.forget(name).await;
        self.registry.remove(name).await?;
        info!(server_name = %name, "Server unregistered");
        Ok(snapshot)
    }

    /// Start every definition marked `auto_start`.
    pub async fn start_auto(&self) -> Vec<StatusSnapshot> {
        let definitions = match self.registry.list().await {
            Ok(defs) => defs,
            Err(e) => {
                warn!(error = %e, "Could not list servers for auto-start");
                return Vec::new();
            }
        };

        let mut started = Vec::new();
        for def in definitions.iter().filter(|d| d.auto_start) {
            let snapshot = self.supervisor.start(def).await;
            if snapshot.is_failure() {
                warn!(
                    server_name = %def.name,
                    message = snapshot.message.as_deref().unwrap_or_default(),
                    "Failed to auto-start server"
                );
            }
            started.push(snapshot);
        }
        started
    }

    /// Forward an opaque tool invocation to a running server.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, SupervisorError> {
        self.supervisor.call_tool(name, tool, arguments).await
    }

    /// Stop everything (application shutdown).
    pub async fn shutdown(&self) {
        let stopped = self.supervisor.stop_all().await;
        info!(count = stopped.len(), "All tool servers stopped");
    }
}

#[async_trait]
impl CapabilityCatalog for ToolServerService {
    async fn live_capabilities(&self, server_name: &str) -> Option<Vec<Capability>> {
        self.supervisor.live_capabilities(server_name)
    }
}
