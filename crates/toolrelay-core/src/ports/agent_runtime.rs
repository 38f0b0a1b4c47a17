//! Agent runtime port.
//!
//! The runtime consumes a prompt plus the active capability set and produces
//! an asynchronous stream of [`StreamEvent`]s. Adapters translate their native
//! event shapes before yielding, so the relay never inspects upstream layouts.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use thiserror::Error;

use crate::domain::{AgentRequest, StreamEvent};

/// Failures on the runtime side of a session.
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// The transport dropped mid-stream; the run may still be alive upstream.
    #[error("Upstream disconnected: {0}")]
    Disconnected(String),

    /// The run has finished or been discarded upstream.
    #[error("Upstream session gone: {0}")]
    Gone(String),

    /// The runtime refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Runtime transport error: {0}")]
    Transport(String),
}

impl RuntimeError {
    /// Whether reconnecting to the same run can help.
    pub const fn is_reconnectable(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// A normalized event tagged with the runtime's resume cursor.
///
/// `cursor` counts upstream events in the runtime's own numbering, including
/// the ones that normalize to nothing (heartbeats, empty tokens). Passing it
/// back to [`AgentRuntime::resume`] continues right after this event.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeEvent {
    pub event: StreamEvent,
    pub cursor: usize,
}

impl RuntimeEvent {
    pub const fn new(event: StreamEvent, cursor: usize) -> Self {
        Self { event, cursor }
    }
}

/// Event stream produced by a runtime.
pub type RuntimeStream = Pin<Box<dyn Stream<Item = Result<RuntimeEvent, RuntimeError>> + Send>>;

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Start a run for the request.
    async fn open(&self, request: &AgentRequest) -> Result<RuntimeStream, RuntimeError>;

    /// Re-subscribe to a still-alive run, continuing after cursor `after`.
    async fn resume(&self, session_id: &str, after: usize) -> Result<RuntimeStream, RuntimeError> {
        let _ = after;
        Err(RuntimeError::Gone(format!(
            "runtime cannot resume session {session_id}"
        )))
    }

    /// Ask the runtime to abandon a run. Finished runs are not an error.
    async fn cancel(&self, session_id: &str) {
        let _ = session_id;
    }
}
