//! Read access to live capabilities for session tool selection.

use async_trait::async_trait;

use crate::domain::Capability;

/// Lookup of the capabilities a running server currently advertises.
#[async_trait]
pub trait CapabilityCatalog: Send + Sync {
    /// `None` when the server is not running.
    async fn live_capabilities(&self, server_name: &str) -> Option<Vec<Capability>>;
}
