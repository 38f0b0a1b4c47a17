//! Lifecycle event emission port.
//!
//! The supervisor and relay announce state changes through this trait; the
//! HTTP adapter fans them out to SSE subscribers.

use crate::events::AppEvent;

/// Fire-and-forget sink for [`AppEvent`]s.
///
/// `emit` must not block: callers hold per-server or per-session locks
/// while emitting.
pub trait AppEventEmitter: Send + Sync {
    fn emit(&self, event: AppEvent);

    /// Clone into a boxed trait object.
    fn clone_box(&self) -> Box<dyn AppEventEmitter>;
}

/// Emitter that drops every event.
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub const fn new() -> Self {
        Self
    }
}

impl AppEventEmitter for NoopEmitter {
    fn emit(&self, _event: AppEvent) {}

    fn clone_box(&self) -> Box<dyn AppEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn noop_emitter_accepts_events() {
        let emitter: Arc<dyn AppEventEmitter> = Arc::new(NoopEmitter::new());
        emitter.emit(AppEvent::server_stopped("calc-tool"));
        let _boxed: Box<dyn AppEventEmitter> = emitter.clone_box();
    }
}
