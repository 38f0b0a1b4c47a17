//! Tool-server process supervisor.
//!
//! Owns the live-state map from server name to process, connection and
//! capabilities. Operations on one name are serialized by that name's slot;
//! different names never contend beyond a brief map lookup.
//!
//! Every state change publishes a complete new [`ServerProcessRecord`], so
//! concurrent readers see either the old record or the new one.

mod process;
mod slot;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::watch;
use toolrelay_core::{
    AppEvent, AppEventEmitter, Capability, ErrorKind, ServerDefinition, ServerProcessRecord,
    ServerStatus, StatusSnapshot, SupervisorError, SupervisorSettings, TransportKind,
};
use tracing::{debug, info, warn};

use self::process::ProcessHandle;
use self::slot::{ServerSlot, SlotState};
use crate::client::DiscoveryClient;
use crate::launch;
use crate::transport::{HttpTransport, StdioTransport, Transport};

/// Launches, watches and stops tool-server processes, one slot per server
/// name. Operations on the same server are serialized; different servers
/// never wait on each other.
pub struct ProcessSupervisor {
    slots: RwLock<HashMap<String, Arc<ServerSlot>>>,
    settings: SupervisorSettings,
    emitter: Arc<dyn AppEventEmitter>,
    http: reqwest::Client,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings, emitter: Arc<dyn AppEventEmitter>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            settings,
            emitter,
            http: reqwest::Client::new(),
        }
    }

    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    fn slot(&self, name: &str) -> Option<Arc<ServerSlot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn slot_or_create(&self, definition: &ServerDefinition) -> Arc<ServerSlot> {
        if let Some(slot) = self.slot(&definition.name) {
            return slot;
        }
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(definition.name.clone())
            .or_insert_with(|| {
                Arc::new(ServerSlot::new(
                    ServerProcessRecord::new(definition),
                    self.emitter.clone(),
                ))
            })
            .clone()
    }

    /// Names with a live-state record, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Current record, if the name has ever been started.
    pub fn record(&self, name: &str) -> Option<Arc<ServerProcessRecord>> {
        self.slot(name).map(|slot| slot.current())
    }

    /// Subscribe to record changes for a name.
    pub fn watch(&self, name: &str) -> Option<watch::Receiver<Arc<ServerProcessRecord>>> {
        self.slot(name).map(|slot| slot.subscribe())
    }

    /// Pure read of the current state. Never blocks on in-flight operations.
    pub fn status(&self, name: &str) -> StatusSnapshot {
        self.record(name).map_or_else(
            || StatusSnapshot::new(name, ServerStatus::Stopped).with_message("Server is stopped"),
            |record| record.snapshot(),
        )
    }

    /// Capabilities of a running server.
    pub fn live_capabilities(&self, name: &str) -> Option<Vec<Capability>> {
        self.record(name)
            .filter(|record| record.status == ServerStatus::Running)
            .map(|record| record.capabilities.clone())
    }

    /// Start a server, or report the running one.
    ///
    /// Callers that queue behind an in-flight start for the same name get
    /// that attempt's outcome instead of spawning a second process.
    pub async fn start(&self, definition: &ServerDefinition) -> StatusSnapshot {
        if let Err(e) = definition.validate() {
            let err = SupervisorError::InvalidConfig(e);
            return StatusSnapshot::new(&definition.name, ServerStatus::Error)
                .with_message(err.to_string())
                .with_error_kind(err.kind());
        }

        let slot = self.slot_or_create(definition);
        let observed_attempts = slot.attempts();
        let mut state = slot.op.lock().await;

        if state.reconcile() {
            debug!(server_name = %definition.name, "Dropped stale connection before start");
        }

        if state.is_live() && slot.current().status == ServerStatus::Running {
            return slot
                .current()
                .snapshot()
                .with_message("Server is already running")
                .with_error_kind(ErrorKind::AlreadyRunning);
        }

        if slot.attempts() != observed_attempts {
            // Another caller's attempt finished while this one waited.
            return slot.current().snapshot();
        }

        let outcome = self.launch(definition, &slot, &mut state).await;
        slot.finish_attempt();

        match outcome {
            Ok(record) => {
                info!(
                    server_name = %definition.name,
                    pid = ?record.pid,
                    capabilities = record.capabilities.len(),
                    "Server running"
                );
                slot.emit(AppEvent::server_started(
                    &definition.name,
                    record.pid,
                    record.capabilities.len(),
                ));
                record.snapshot()
            }
            Err(e) => {
                warn!(server_name = %definition.name, error = %e, "Server failed to start");
                let record = slot.publish(slot.current().errored(e.to_string()));
                slot.emit(AppEvent::server_error(&definition.name, e.kind(), e.to_string()));
                record.snapshot().with_error_kind(e.kind())
            }
        }
    }

    /// Spawn (if needed), handshake and discover. On failure nothing is left running.
    async fn launch(
        &self,
        definition: &ServerDefinition,
        slot: &Arc<ServerSlot>,
        state: &mut SlotState,
    ) -> Result<Arc<ServerProcessRecord>, SupervisorError> {
        slot.publish(slot.current().with_definition(definition).starting());

        let (process, transport) = self.connect(definition, slot)?;
        let pid = process.as_ref().and_then(ProcessHandle::pid);
        slot.publish(slot.current().spawned(pid));

        let client = Arc::new(DiscoveryClient::new(
            &definition.name,
            transport,
            self.settings.clone(),
        ));

        let discovered = async {
            if process.is_some() {
                tokio::time::sleep(self.settings.settle_delay).await;
                if !process.as_ref().is_some_and(ProcessHandle::is_alive) {
                    return Err(SupervisorError::SpawnFailure(
                        "process exited during startup".to_string(),
                    ));
                }
            }
            client.handshake().await?;
            client.discover().await
        }
        .await;

        match discovered {
            Ok(capabilities) => {
                // The watch task may have recorded an exit while discovery ran.
                let promoted = slot.publish_if(
                    |record| record.status == ServerStatus::Starting,
                    |record| record.running(pid, capabilities),
                );
                if !promoted {
                    return Err(SupervisorError::SpawnFailure(
                        "process exited during startup".to_string(),
                    ));
                }
                state.process = process;
                state.client = Some(client);
                Ok(slot.current())
            }
            Err(e) => {
                if let Some(process) = process {
                    if let Err(stop_err) = process.terminate(self.settings.termination_grace).await {
                        warn!(server_name = %definition.name, error = %stop_err, "Failed to clean up after failed start");
                    }
                }
                Err(e)
            }
        }
    }

    /// Spawn the process (when the definition has a command) and open the transport.
    fn connect(
        &self,
        definition: &ServerDefinition,
        slot: &Arc<ServerSlot>,
    ) -> Result<(Option<ProcessHandle>, Arc<dyn Transport>), SupervisorError> {
        let mut child = if definition.spawns_process() {
            Some(launch::spawn(definition)?)
        } else {
            None
        };

        if let Some(child) = child.as_mut() {
            if let Some(stderr) = child.stderr.take() {
                launch::spawn_log_reader(definition.name.clone(), "stderr", stderr);
            }
        }

        let transport: Arc<dyn Transport> = match definition.transport {
            TransportKind::Stdio => {
                let child = child.as_mut().ok_or_else(|| {
                    SupervisorError::InvalidConfig("stdio servers require a command".to_string())
                })?;
                let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
                    return Err(SupervisorError::SpawnFailure(
                        "child stdio pipes unavailable".to_string(),
                    ));
                };
                Arc::new(StdioTransport::new(&definition.name, stdout, stdin))
            }
            TransportKind::Network => {
                if let Some(stdout) = child.as_mut().and_then(|c| c.stdout.take()) {
                    launch::spawn_log_reader(definition.name.clone(), "stdout", stdout);
                }
                let url = definition.url.clone().ok_or_else(|| {
                    SupervisorError::InvalidConfig("network servers require a url".to_string())
                })?;
                Arc::new(HttpTransport::with_client(self.http.clone(), url))
            }
        };

        let process = child.map(|child| {
            ProcessHandle::watch(definition.name.clone(), child, Arc::downgrade(slot))
        });
        Ok((process, transport))
    }

    /// Stop a server. Always ends with `stopped` and no pid.
    pub async fn stop(&self, name: &str) -> StatusSnapshot {
        let Some(slot) = self.slot(name) else {
            return StatusSnapshot::new(name, ServerStatus::Stopped)
                .with_message("Server is not running");
        };

        let mut state = slot.op.lock().await;
        let process = state.process.take();
        let had_connection = state.client.take().is_some();
        let current = slot.current();

        if process.is_none() && !had_connection {
            if current.status == ServerStatus::Stopped {
                return current.snapshot().with_message("Server is not running");
            }
            return slot.publish(current.stopped(None)).snapshot();
        }

        slot.publish(current.stopping());
        info!(server_name = %name, pid = ?current.pid, "Stopping server");

        let mut message = None;
        if let Some(process) = process {
            match process.terminate(self.settings.termination_grace).await {
                Ok(Some(outcome)) if outcome.was_forced() => {
                    warn!(server_name = %name, "Server ignored SIGTERM; killed");
                    message = Some("Server stopped (forced kill)".to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(server_name = %name, error = %e, "Termination failed");
                    slot.emit(AppEvent::server_error(name, e.kind(), e.to_string()));
                    message = Some(format!("Server stopped; {e}"));
                }
            }
        }

        let record = slot.publish(slot.current().stopped(message));
        slot.emit(AppEvent::server_stopped(name));
        record.snapshot()
    }

    /// Re-run discovery on the existing connection.
    ///
    /// On failure the previous capability list is kept.
    pub async fn refresh_capabilities(&self, name: &str) -> Result<StatusSnapshot, SupervisorError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;
        let mut state = slot.op.lock().await;

        if state.reconcile() || slot.current().status != ServerStatus::Running {
            return Err(SupervisorError::NotRunning(name.to_string()));
        }
        let client = state
            .client
            .clone()
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;

        let capabilities = client.discover().await?;
        let count = capabilities.len();
        let record = slot.publish(
            slot.current()
                .with_capabilities(capabilities)
                .with_message("Capabilities refreshed"),
        );
        info!(server_name = %name, capabilities = count, "Capabilities refreshed");
        slot.emit(AppEvent::capabilities_refreshed(name, count));
        Ok(record.snapshot())
    }

    /// Invoke a capability on a running server.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, SupervisorError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;
        let client = {
            let state = slot.op.lock().await;
            if !state.is_live() {
                return Err(SupervisorError::NotRunning(name.to_string()));
            }
            state.client.clone()
        }
        .ok_or_else(|| SupervisorError::NotRunning(name.to_string()))?;

        client.call_tool(tool, arguments).await
    }

    /// Stop the server and drop its record.
    pub async fn forget(&self, name: &str) -> StatusSnapshot {
        let snapshot = self.stop(name).await;
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        snapshot
    }

    /// Stop every server concurrently.
    pub async fn stop_all(&self) -> Vec<StatusSnapshot> {
        let names = self.names();
        join_all(names.iter().map(|name| self.stop(name))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrelay_core::NoopEmitter;

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(SupervisorSettings::default(), Arc::new(NoopEmitter::new()))
    }

    #[tokio::test]
    async fn stop_unknown_is_noop() {
        let snap = supervisor().stop("calc-tool").await;
        assert_eq!(snap.status, ServerStatus::Stopped);
        assert_eq!(snap.pid, None);
        assert!(!snap.is_failure());
    }

    #[tokio::test]
    async fn status_of_unstarted_server() {
        let sup = supervisor();
        let snap = sup.status("calc-tool");
        assert_eq!(snap.status, ServerStatus::Stopped);
        assert!(sup.names().is_empty());
    }

    #[tokio::test]
    async fn invalid_definition_reports_error() {
        let def = ServerDefinition {
            name: "broken".into(),
            ..ServerDefinition::default()
        };
        let snap = supervisor().start(&def).await;
        assert_eq!(snap.status, ServerStatus::Error);
        assert_eq!(snap.error_kind, Some(ErrorKind::InvalidConfig));
    }

    #[tokio::test]
    async fn spawn_failure_sets_error_status() {
        let sup = supervisor();
        let def = ServerDefinition::stdio("ghost", "/nonexistent/bin/ghost-server");
        let snap = sup.start(&def).await;
        assert_eq!(snap.status, ServerStatus::Error);
        assert_eq!(snap.error_kind, Some(ErrorKind::SpawnFailure));
        assert!(snap.message.unwrap().contains("not found"));
        assert_eq!(sup.status("ghost").status, ServerStatus::Error);
    }

    #[tokio::test]
    async fn refresh_requires_running() {
        let err = supervisor().refresh_capabilities("calc-tool").await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning(_)));
    }

    #[tokio::test]
    async fn unreachable_network_server_fails_start() {
        let settings = SupervisorSettings::default()
            .with_readiness_timeout(std::time::Duration::from_millis(300))
            .with_retry_base_delay(std::time::Duration::from_millis(50));
        let sup = ProcessSupervisor::new(settings, Arc::new(NoopEmitter::new()));
        let def = ServerDefinition::network("remote", "http://127.0.0.1:9/mcp");

        let snap = sup.start(&def).await;
        assert_eq!(snap.status, ServerStatus::Error);
        assert!(snap.is_failure());
        assert_eq!(snap.pid, None);
    }
}
