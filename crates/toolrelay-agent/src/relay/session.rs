//! Per-session state shared between the pump, the attachment watchdog and
//! client subscriptions.
//!
//! Each session has its own lock; nothing here is shared across sessions.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use toolrelay_core::{RelayError, SessionState, StreamEvent};
use tracing::debug;

pub(crate) struct Session {
    id: String,
    inner: Mutex<SessionInner>,
    /// Bumped on every change; waiters re-check their condition.
    changed: watch::Sender<u64>,
    pub(crate) cancel: CancellationToken,
}

struct SessionInner {
    state: SessionState,
    /// Undelivered events; `log[0]` has absolute index `base`.
    log: VecDeque<StreamEvent>,
    base: u64,
    /// Events the client has confirmed.
    delivered: u64,
    attached: bool,
    /// Incremented on every attach.
    attachments: u64,
    /// Upstream resume attempts in the current outage.
    reconnect_attempts: u32,
    /// No further events will be appended.
    sealed: bool,
}

impl SessionInner {
    fn total(&self) -> u64 {
        self.base + self.log.len() as u64
    }
}

/// What a subscription finds at its cursor.
pub(crate) enum Slot {
    Ready(StreamEvent),
    Pending,
    Exhausted,
}

impl Session {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            id: id.into(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                log: VecDeque::new(),
                base: 0,
                delivered: 0,
                attached: false,
                attachments: 0,
                reconnect_attempts: 0,
                sealed: false,
            }),
            changed,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub(crate) fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changed.subscribe()
    }

    pub(crate) fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Apply a transition if the state machine allows it.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let moved = {
            let mut inner = self.lock();
            if inner.state == next {
                return true;
            }
            if inner.state.can_transition_to(next) {
                inner.state = next;
                true
            } else {
                debug!(session_id = %self.id, from = %inner.state, to = %next, "Ignoring invalid session transition");
                false
            }
        };
        if moved {
            self.bump();
        }
        moved
    }

    /// Append an event for delivery. Ignored once the session is sealed.
    pub(crate) fn push(&self, event: StreamEvent) {
        {
            let mut inner = self.lock();
            if inner.sealed {
                return;
            }
            inner.log.push_back(event);
        }
        self.bump();
    }

    /// Append a terminal event, enter `state` and refuse further events.
    pub(crate) fn finish(&self, event: Option<StreamEvent>, state: SessionState) {
        {
            let mut inner = self.lock();
            if inner.sealed {
                return;
            }
            if let Some(event) = event {
                inner.log.push_back(event);
            }
            inner.sealed = true;
            if inner.state.can_transition_to(state) {
                inner.state = state;
            }
        }
        self.bump();
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Events appended but not yet confirmed by a client.
    pub(crate) fn backlog(&self) -> u64 {
        let inner = self.lock();
        inner.total() - inner.delivered
    }

    /// Sealed and every event confirmed.
    pub(crate) fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.sealed && inner.delivered == inner.total()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.lock().attached
    }

    pub(crate) fn attachments(&self) -> u64 {
        self.lock().attachments
    }

    /// Claim the session for one client. Returns the first undelivered index.
    pub(crate) fn attach(&self) -> Result<u64, RelayError> {
        let cursor = {
            let mut inner = self.lock();
            if inner.attached {
                return Err(RelayError::DuplicateSession(self.id.clone()));
            }
            inner.attached = true;
            inner.attachments += 1;
            inner.delivered
        };
        self.bump();
        Ok(cursor)
    }

    pub(crate) fn detach(&self) {
        self.lock().attached = false;
        self.bump();
    }

    /// Event at absolute index `cursor`.
    pub(crate) fn event_at(&self, cursor: u64) -> Slot {
        let inner = self.lock();
        if cursor < inner.base {
            // Already confirmed by an earlier attachment.
            return Slot::Exhausted;
        }
        usize::try_from(cursor - inner.base)
            .ok()
            .and_then(|offset| inner.log.get(offset))
            .map_or_else(
                || {
                    if inner.sealed {
                        Slot::Exhausted
                    } else {
                        Slot::Pending
                    }
                },
                |event| Slot::Ready(event.clone()),
            )
    }

    /// Confirm delivery of every event below `cursor` and release them.
    pub(crate) fn confirm(&self, cursor: u64) {
        {
            let mut inner = self.lock();
            let cursor = cursor.min(inner.total());
            if cursor <= inner.delivered {
                return;
            }
            inner.delivered = cursor;
            while inner.base < inner.delivered {
                inner.log.pop_front();
                inner.base += 1;
            }
        }
        self.bump();
    }

    pub(crate) fn record_reconnect_attempt(&self) -> u32 {
        let mut inner = self.lock();
        inner.reconnect_attempts += 1;
        inner.reconnect_attempts
    }

    pub(crate) fn reset_reconnect_attempts(&self) {
        self.lock().reconnect_attempts = 0;
    }

    pub(crate) fn reconnect_attempts(&self) -> u32 {
        self.lock().reconnect_attempts
    }

    /// Wait until `ready` holds or the session is cancelled.
    /// Returns `false` on cancellation.
    pub(crate) async fn wait_until(&self, ready: impl Fn(&Self) -> bool) -> bool {
        let mut changes = self.subscribe_changes();
        loop {
            if ready(self) {
                return true;
            }
            tokio::select! {
                () = self.cancel.cancelled() => return false,
                changed = changes.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_releases_delivered_events() {
        let session = Session::new("s1");
        session.push(StreamEvent::token("Hel"));
        session.push(StreamEvent::token("lo"));
        assert_eq!(session.backlog(), 2);

        session.confirm(1);
        assert_eq!(session.backlog(), 1);
        assert!(matches!(session.event_at(0), Slot::Exhausted));
        assert!(matches!(session.event_at(1), Slot::Ready(StreamEvent::Token(ref t)) if t == "lo"));
        assert!(matches!(session.event_at(2), Slot::Pending));
    }

    #[test]
    fn sealed_session_refuses_events() {
        let session = Session::new("s1");
        session.transition(SessionState::Open);
        session.finish(Some(StreamEvent::End), SessionState::Completed);
        session.push(StreamEvent::token("late"));

        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.backlog(), 1);
        assert!(matches!(session.event_at(1), Slot::Exhausted));

        session.confirm(1);
        assert!(session.is_drained());
    }

    #[test]
    fn single_attachment() {
        let session = Session::new("s1");
        assert_eq!(session.attach().unwrap(), 0);
        assert!(matches!(session.attach(), Err(RelayError::DuplicateSession(_))));
        session.detach();
        assert_eq!(session.attach().unwrap(), 0);
        assert_eq!(session.attachments(), 2);
    }

    #[test]
    fn invalid_transition_rejected() {
        let session = Session::new("s1");
        assert!(!session.transition(SessionState::Streaming));
        assert!(session.transition(SessionState::Open));
        assert!(session.transition(SessionState::Streaming));
        assert_eq!(session.state(), SessionState::Streaming);
    }
}
