//! Core domain types and ports for toolrelay.
//!
//! This crate has no process or network I/O. It defines what a tool server
//! and a streaming session look like, the errors both can report, and the
//! traits adapters implement:
//!
//! - [`ServerRegistry`]: where server definitions come from
//! - [`AgentRuntime`]: what turns a prompt into a stream of events
//! - [`AppEventEmitter`]: where lifecycle events go

#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod error;
pub mod events;
pub mod ports;
pub mod registry;
pub mod settings;

pub use domain::{
    AgentRequest, Capability, ChatRequest, ServerDefinition, ServerProcessRecord, ServerStatus,
    SessionState, StatusSnapshot, StreamEnvelope, StreamError, StreamEvent, TransportKind,
};
pub use error::{ErrorKind, RelayError, SupervisorError};
pub use events::AppEvent;
pub use ports::{
    AgentRuntime, AppEventEmitter, CapabilityCatalog, NoopEmitter, RegistryError, RuntimeError,
    RuntimeEvent, RuntimeStream, ServerRegistry,
};
pub use registry::InMemoryServerRegistry;
pub use settings::{RelaySettings, SettingsError, SupervisorSettings, validate_settings};
