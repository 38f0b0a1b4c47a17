//! A client's attachment to a session.

use std::sync::Arc;

use toolrelay_core::{SessionState, StreamEvent};

use super::session::{Session, Slot};

/// Ordered reader over one session's events.
///
/// At most one subscription exists per session. Delivery is confirmed with
/// [`ack`](Self::ack) once the event has reached the client; a re-attached
/// subscription starts after the last confirmed event, so nothing is sent
/// twice. Dropping the subscription detaches without cancelling the session.
pub struct SessionSubscription {
    session: Arc<Session>,
    cursor: u64,
}

impl SessionSubscription {
    pub(crate) fn new(session: Arc<Session>, cursor: u64) -> Self {
        Self { session, cursor }
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Next event in order, or `None` once the session has nothing more to
    /// deliver (completed, failed or cancelled).
    pub async fn next(&mut self) -> Option<StreamEvent> {
        let mut changes = self.session.subscribe_changes();
        loop {
            match self.session.event_at(self.cursor) {
                Slot::Ready(event) => {
                    self.cursor += 1;
                    return Some(event);
                }
                Slot::Exhausted => return None,
                Slot::Pending if self.session.cancel.is_cancelled() => return None,
                Slot::Pending => {}
            }
            tokio::select! {
                () = self.session.cancel.cancelled() => {}
                changed = changes.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    /// Confirm every event returned so far.
    pub fn ack(&self) {
        self.session.confirm(self.cursor);
    }

    /// Events returned by [`next`](Self::next) across all attachments.
    pub const fn position(&self) -> u64 {
        self.cursor
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.session.detach();
    }
}

impl std::fmt::Debug for SessionSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSubscription")
            .field("session_id", &self.session.id())
            .field("cursor", &self.cursor)
            .finish()
    }
}
