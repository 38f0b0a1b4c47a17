//! Upstream side of a session: drains the runtime stream into the session
//! log, reconnecting with bounded backoff when the runtime transport drops.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::json;
use toolrelay_core::{
    AgentRequest, AgentRuntime, AppEvent, AppEventEmitter, RelaySettings, RuntimeError,
    RuntimeStream, SessionState, StreamEvent,
};
use tracing::{debug, info, warn};

use super::SessionTable;
use super::session::Session;
use crate::backoff::Backoff;

/// Everything the pump task needs, moved into it at spawn.
pub(crate) struct Pump {
    pub(crate) session: Arc<Session>,
    pub(crate) runtime: Arc<dyn AgentRuntime>,
    pub(crate) sessions: Arc<SessionTable>,
    pub(crate) emitter: Arc<dyn AppEventEmitter>,
    pub(crate) settings: RelaySettings,
    pub(crate) request: AgentRequest,
}

/// How the upstream loop ended.
enum Upstream {
    Finished,
    Cancelled,
}

/// Running text of the answer, for the synthetic `final`.
#[derive(Default)]
struct Transcript {
    text: String,
    saw_final: bool,
    /// Runtime cursor of the last event received; the resume offset.
    cursor: usize,
}

impl Pump {
    pub(crate) async fn run(self) {
        let session_id = self.session.id().to_string();
        let upstream = self.drive().await;

        if matches!(upstream, Upstream::Cancelled) {
            self.cancel_upstream().await;
            self.session.finish(None, SessionState::Closed);
        } else {
            // Hold the session until the client has everything, or gives up.
            self.session.wait_until(Session::is_drained).await;
        }

        let final_state = Some(self.session.state())
            .filter(|state| state.is_finished())
            .unwrap_or(SessionState::Closed);
        self.session.transition(SessionState::Closed);
        self.session.cancel.cancel();
        self.sessions.remove_if_same(&self.session);

        info!(session_id = %session_id, final_state = %final_state, "Session closed");
        self.emitter
            .emit(AppEvent::session_closed(&session_id, final_state));
    }

    async fn drive(&self) -> Upstream {
        let opened = tokio::select! {
            () = self.session.cancel.cancelled() => return Upstream::Cancelled,
            opened = self.runtime.open(&self.request) => opened,
        };

        let mut transcript = Transcript::default();
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) if e.is_reconnectable() => {
                warn!(session_id = %self.session.id(), error = %e, "Runtime dropped while opening");
                match self.reconnect(&transcript).await {
                    Ok(stream) => stream,
                    Err(upstream) => return upstream,
                }
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Runtime refused session");
                self.fail(e.to_string());
                return Upstream::Finished;
            }
        };
        self.session.transition(SessionState::Open);

        loop {
            let next = tokio::select! {
                () = self.session.cancel.cancelled() => return Upstream::Cancelled,
                next = tokio::time::timeout(self.settings.idle_timeout, stream.next()) => next,
            };

            let disconnect = match next {
                Err(_) => {
                    warn!(
                        session_id = %self.session.id(),
                        idle_secs = self.settings.idle_timeout.as_secs(),
                        "Runtime went silent"
                    );
                    self.cancel_upstream().await;
                    self.fail(format!(
                        "no response from agent runtime for {}s",
                        self.settings.idle_timeout.as_secs()
                    ));
                    return Upstream::Finished;
                }
                Ok(Some(Ok(item))) => {
                    transcript.cursor = transcript.cursor.max(item.cursor);
                    if self.deliver(item.event, &mut transcript).await {
                        return Upstream::Finished;
                    }
                    if self.session.cancel.is_cancelled() {
                        return Upstream::Cancelled;
                    }
                    continue;
                }
                Ok(Some(Err(e))) if e.is_reconnectable() => e,
                Ok(Some(Err(e))) => {
                    warn!(session_id = %self.session.id(), error = %e, "Runtime stream failed");
                    self.fail(e.to_string());
                    return Upstream::Finished;
                }
                Ok(None) => RuntimeError::Disconnected("stream ended before completion".to_string()),
            };

            warn!(session_id = %self.session.id(), error = %disconnect, "Upstream disconnected");
            stream = match self.reconnect(&transcript).await {
                Ok(stream) => stream,
                Err(upstream) => return upstream,
            };
        }
    }

    /// Record one runtime event. Returns `true` when the session is finished.
    async fn deliver(&self, event: StreamEvent, transcript: &mut Transcript) -> bool {
        match event {
            StreamEvent::End => {
                if !transcript.saw_final
                    && self.settings.emit_final_summary
                    && !transcript.text.is_empty()
                {
                    self.session
                        .push(StreamEvent::final_message(transcript.text.clone()));
                }
                self.session
                    .finish(Some(StreamEvent::End), SessionState::Completed);
                debug!(session_id = %self.session.id(), cursor = transcript.cursor, "Session completed");
                true
            }
            StreamEvent::Error(err) if !err.recoverable => {
                self.session
                    .finish(Some(StreamEvent::Error(err)), SessionState::Errored);
                true
            }
            event => {
                match &event {
                    StreamEvent::Token(text) => transcript.text.push_str(text),
                    StreamEvent::Final(_) => transcript.saw_final = true,
                    _ => {}
                }
                self.session.transition(SessionState::Streaming);
                self.wait_for_capacity().await;
                self.session.push(event);
                false
            }
        }
    }

    /// Block while the client is `channel_capacity` events behind.
    async fn wait_for_capacity(&self) {
        let capacity = self.settings.channel_capacity as u64;
        self.session
            .wait_until(|session| session.backlog() < capacity)
            .await;
    }

    /// Bounded reconnect loop. On success the attempt counter is reset.
    async fn reconnect(&self, transcript: &Transcript) -> Result<RuntimeStream, Upstream> {
        let mut backoff = Backoff::from_settings(&self.settings);
        loop {
            let Some(delay) = backoff.next_delay() else {
                let attempts = backoff.attempts();
                warn!(session_id = %self.session.id(), attempts, "Reconnect attempts exhausted");
                self.fail(format!(
                    "upstream disconnected; gave up after {attempts} reconnect attempts"
                ));
                return Err(Upstream::Finished);
            };
            let attempt = self.session.record_reconnect_attempt();

            tokio::select! {
                () = self.session.cancel.cancelled() => return Err(Upstream::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            debug!(
                session_id = %self.session.id(),
                attempt,
                after = transcript.cursor,
                "Resuming upstream stream"
            );
            let resumed = tokio::select! {
                () = self.session.cancel.cancelled() => return Err(Upstream::Cancelled),
                resumed = self.runtime.resume(self.session.id(), transcript.cursor) => resumed,
            };

            match resumed {
                Ok(stream) => {
                    info!(session_id = %self.session.id(), attempt, "Upstream stream resumed");
                    self.session.reset_reconnect_attempts();
                    self.session
                        .push(StreamEvent::Info(json!({ "reconnected": true, "attempt": attempt })));
                    return Ok(stream);
                }
                Err(RuntimeError::Gone(reason)) => {
                    warn!(session_id = %self.session.id(), %reason, "Upstream session no longer available");
                    self.fail(format!("upstream session ended: {reason}"));
                    return Err(Upstream::Finished);
                }
                Err(RuntimeError::Rejected(reason)) => {
                    self.fail(format!("upstream refused resume: {reason}"));
                    return Err(Upstream::Finished);
                }
                Err(e) => {
                    debug!(session_id = %self.session.id(), attempt, error = %e, "Resume attempt failed");
                }
            }
        }
    }

    fn fail(&self, message: String) {
        self.session
            .finish(Some(StreamEvent::error(message, false)), SessionState::Errored);
    }

    /// Ask the runtime to abandon the run, bounded by the cancel grace.
    async fn cancel_upstream(&self) {
        let cancelled = tokio::time::timeout(
            self.settings.cancel_grace,
            self.runtime.cancel(self.session.id()),
        )
        .await;
        if cancelled.is_err() {
            warn!(session_id = %self.session.id(), "Runtime did not acknowledge cancellation");
        }
    }
}

/// Fail a session whose client detached and did not come back within the
/// backoff window.
pub(crate) async fn watch_attachment(session: Arc<Session>, settings: RelaySettings) {
    loop {
        let detached = session
            .wait_until(|s| !s.is_attached() && !s.is_drained())
            .await;
        if !detached {
            return;
        }
        let generation = session.attachments();

        let mut backoff = Backoff::from_settings(&settings);
        let reattached = loop {
            let Some(delay) = backoff.next_delay() else {
                break false;
            };
            debug!(
                session_id = %session.id(),
                attempt = backoff.attempts(),
                "Waiting for client to re-attach"
            );

            let came_back = tokio::time::timeout(
                delay,
                session.wait_until(|s| s.attachments() != generation || s.is_drained()),
            )
            .await;
            match came_back {
                Ok(true) => break true,
                Ok(false) => return,
                Err(_) => {}
            }
        };

        if !reattached {
            warn!(
                session_id = %session.id(),
                attempts = backoff.attempts(),
                "Client did not re-attach; failing session"
            );
            session.finish(
                Some(StreamEvent::error(
                    "client did not reconnect before the retry window closed",
                    false,
                )),
                SessionState::Errored,
            );
            session.cancel.cancel();
            return;
        }
    }
}
