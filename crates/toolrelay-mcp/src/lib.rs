#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by the integration tests under tests/
#[cfg(test)]
use tempfile as _;

pub mod client;
pub mod launch;
pub mod protocol;
pub mod service;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

pub use client::{DiscoveryClient, ServerHandshake, parse_capability_page};
pub use service::ToolServerService;
pub use shutdown::ShutdownOutcome;
pub use supervisor::ProcessSupervisor;
pub use transport::{HttpTransport, StdioTransport, Transport, TransportError};
