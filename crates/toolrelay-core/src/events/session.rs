//! Streaming session lifecycle event constructors.

use super::AppEvent;
use crate::domain::SessionState;

impl AppEvent {
    pub fn session_opened(session_id: impl Into<String>) -> Self {
        Self::SessionOpened {
            session_id: session_id.into(),
        }
    }

    pub fn session_closed(session_id: impl Into<String>, final_state: SessionState) -> Self {
        Self::SessionClosed {
            session_id: session_id.into(),
            final_state,
        }
    }
}
