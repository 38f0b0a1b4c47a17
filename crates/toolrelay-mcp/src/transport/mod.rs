//! Transports carrying JSON-RPC between the supervisor and a tool server.
//!
//! - [`StdioTransport`]: newline-delimited JSON over the child's pipes
//! - [`HttpTransport`]: JSON-RPC over HTTP POST to a network endpoint

mod http;
mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

/// Errors from a single transport exchange.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed by server")]
    Closed,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Server returned error: code={code}, message={message}")]
    Server { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Endpoint not reachable right now (connection refused, 5xx, 429).
    #[error("Endpoint unavailable: {0}")]
    Unavailable(String),

    /// Endpoint refused the request (4xx).
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether retrying the same exchange may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A request/response channel to one tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its `result` member.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError>;

    /// Send a notification. No response is expected.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError>;
}
