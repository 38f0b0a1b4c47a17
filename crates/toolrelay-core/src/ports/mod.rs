//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define interfaces the core depends on without knowing the concrete
//! implementation: the configuration registry, the agent runtime, and the
//! event sink.

mod agent_runtime;
mod capability_catalog;
mod event_emitter;
mod server_registry;

pub use agent_runtime::{AgentRuntime, RuntimeError, RuntimeEvent, RuntimeStream};
pub use capability_catalog::CapabilityCatalog;
pub use event_emitter::{AppEventEmitter, NoopEmitter};
pub use server_registry::{RegistryError, ServerRegistry};
