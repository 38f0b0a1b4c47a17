//! Configuration registry port.
//!
//! The registry owns tool-server definitions. The core reads them and never
//! persists anything itself.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ServerDefinition;

/// Errors from a [`ServerRegistry`] implementation.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Server definition not found: {0}")]
    NotFound(String),

    #[error("Invalid server definition: {0}")]
    Invalid(String),

    /// Backend failure (file, database, ...).
    #[error("Registry error: {0}")]
    Internal(String),
}

/// Source of tool-server definitions, keyed by unique name.
///
/// # Errors
///
/// - `NotFound` if no definition exists for the name
/// - `Invalid` if a definition fails validation on `upsert`
/// - `Internal` for backend errors
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn get(&self, name: &str) -> Result<ServerDefinition, RegistryError>;

    /// All definitions, ordered by name.
    async fn list(&self) -> Result<Vec<ServerDefinition>, RegistryError>;

    /// Insert or replace a definition.
    async fn upsert(&self, definition: ServerDefinition) -> Result<(), RegistryError>;

    async fn remove(&self, name: &str) -> Result<(), RegistryError>;
}
