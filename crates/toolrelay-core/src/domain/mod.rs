//! Domain types for tool servers and streaming sessions.

mod process;
mod server;
mod stream;

pub use process::{ServerProcessRecord, ServerStatus, StatusSnapshot};
pub use server::{Capability, ServerDefinition, TransportKind};
pub use stream::{
    AgentRequest, ChatRequest, SessionState, StreamEnvelope, StreamError, StreamEvent,
};
