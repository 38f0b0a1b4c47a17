#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Silence unused dev-dependency warnings for integration-only test deps
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tower as _;

// Used by main.rs binary
use dotenvy as _;

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;

// Re-export primary types
pub use bootstrap::{
    AxumContext, CorsConfig, ServerConfig, bootstrap, bootstrap_with_runtime, init_tracing,
    start_server,
};
pub use error::HttpError;
pub use routes::create_router;
pub use sse::SseBroadcaster;
pub use state::AppState;
