//! Streaming session relay.
//!
//! One session per chat turn. The relay forwards the prompt and the selected
//! capabilities to the [`AgentRuntime`] and delivers the normalized events to
//! a single attached client, in order and exactly once.
//!
//! # Structure
//!
//! - `session` - per-session log, state machine and attachment
//! - `pump` - runtime stream draining, upstream reconnect, client re-attach window
//! - `subscription` - the client-facing reader
//!
//! Sessions are independent: the table lock is held only for insert, lookup
//! and removal, and each session has its own state lock and its own task.

mod pump;
mod session;
mod subscription;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use toolrelay_core::{
    AgentRequest, AgentRuntime, AppEvent, AppEventEmitter, Capability, CapabilityCatalog,
    ChatRequest, RelayError, RelaySettings, SessionState,
};
use tracing::{debug, info, warn};

use self::pump::{Pump, watch_attachment};
use self::session::Session;
pub use self::subscription::SessionSubscription;

/// Active sessions keyed by id.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_new(&self, session: Arc<Session>) -> Result<(), RelayError> {
        let mut sessions = self.lock();
        if sessions.contains_key(session.id()) {
            return Err(RelayError::DuplicateSession(session.id().to_string()));
        }
        sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().remove(id)
    }

    /// Remove `session` unless the id has since been reused.
    pub(crate) fn remove_if_same(&self, session: &Arc<Session>) {
        let mut sessions = self.lock();
        if sessions
            .get(session.id())
            .is_some_and(|current| Arc::ptr_eq(current, session))
        {
            sessions.remove(session.id());
        }
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn drain(&self) -> Vec<Arc<Session>> {
        self.lock().drain().map(|(_, session)| session).collect()
    }
}

/// Owns every streaming session: one pump task per session upstream, and at
/// most one attached client downstream.
pub struct SessionRelay {
    sessions: Arc<SessionTable>,
    runtime: Arc<dyn AgentRuntime>,
    catalog: Option<Arc<dyn CapabilityCatalog>>,
    emitter: Arc<dyn AppEventEmitter>,
    settings: RelaySettings,
}

impl SessionRelay {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        settings: RelaySettings,
        emitter: Arc<dyn AppEventEmitter>,
    ) -> Self {
        Self {
            sessions: Arc::new(SessionTable::default()),
            runtime,
            catalog: None,
            emitter,
            settings,
        }
    }

    /// Fill empty per-server tool selections from live capabilities.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Arc<dyn CapabilityCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub const fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Open a session, or re-attach when `request.resume` is set.
    ///
    /// The returned subscription is attached; the session keeps running if
    /// it is dropped and can be re-attached within the retry window.
    pub async fn open(&self, request: ChatRequest) -> Result<SessionSubscription, RelayError> {
        if request.resume {
            return self.attach(&request.session_id);
        }
        if request.prompt.trim().is_empty() {
            return Err(RelayError::InvalidRequest("prompt must not be empty".to_string()));
        }

        let session_id = if request.session_id.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            request.session_id.clone()
        };

        // Cheap pre-check so a duplicate never resolves tools.
        if self.sessions.get(&session_id).is_some() {
            return Err(RelayError::DuplicateSession(session_id));
        }

        let agent_request = AgentRequest {
            session_id: session_id.clone(),
            prompt: request.prompt,
            tools: self.resolve_tools(request.tools_config).await,
            model_selector: request.model_selector,
        };

        let session = Arc::new(Session::new(&session_id));
        self.sessions.insert_new(session.clone())?;
        let cursor = session.attach()?;

        info!(
            session_id = %session_id,
            servers = agent_request.tools.len(),
            model = agent_request.model_selector.as_deref().unwrap_or("default"),
            "Session opened"
        );
        self.emitter.emit(AppEvent::session_opened(&session_id));

        tokio::spawn(watch_attachment(session.clone(), self.settings.clone()));
        tokio::spawn(
            Pump {
                session: session.clone(),
                runtime: self.runtime.clone(),
                sessions: self.sessions.clone(),
                emitter: self.emitter.clone(),
                settings: self.settings.clone(),
                request: agent_request,
            }
            .run(),
        );

        Ok(SessionSubscription::new(session, cursor))
    }

    /// Re-attach a client to a running session after its connection dropped.
    pub fn attach(&self, session_id: &str) -> Result<SessionSubscription, RelayError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| RelayError::SessionNotFound(session_id.to_string()))?;
        let cursor = session.attach()?;
        debug!(session_id, cursor, "Client re-attached");
        Ok(SessionSubscription::new(session, cursor))
    }

    /// Cancel a session: release its slot now and tell the runtime to stop.
    ///
    /// Returns `false` if the session had already finished or never existed.
    pub fn cancel(&self, session_id: &str) -> bool {
        let Some(session) = self.sessions.remove(session_id) else {
            debug!(session_id, "Cancel for unknown or finished session");
            return false;
        };
        info!(session_id, state = %session.state(), "Session cancelled by client");
        session.cancel.cancel();
        true
    }

    pub fn state(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|session| session.state())
    }

    /// Upstream reconnect attempts in the current outage. Client re-attach
    /// waits are not counted.
    pub fn reconnect_attempts(&self, session_id: &str) -> Option<u32> {
        self.sessions
            .get(session_id)
            .map(|session| session.reconnect_attempts())
    }

    pub fn active_sessions(&self) -> Vec<String> {
        self.sessions.ids()
    }

    /// Cancel every session (application shutdown).
    pub fn shutdown(&self) {
        let sessions = self.sessions.drain();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Cancelling active sessions");
        }
        for session in sessions {
            session.cancel.cancel();
        }
    }

    /// Replace empty per-server selections with the server's live capabilities.
    async fn resolve_tools(
        &self,
        tools_config: BTreeMap<String, Vec<Capability>>,
    ) -> BTreeMap<String, Vec<Capability>> {
        let Some(catalog) = &self.catalog else {
            return tools_config;
        };

        let mut tools = BTreeMap::new();
        for (server, selected) in tools_config {
            if !selected.is_empty() {
                tools.insert(server, selected);
                continue;
            }
            match catalog.live_capabilities(&server).await {
                Some(live) => {
                    tools.insert(server, live);
                }
                None => {
                    warn!(server_name = %server, "Selected tool server is not running; skipping");
                }
            }
        }
        tools
    }
}

impl Drop for SessionRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}
