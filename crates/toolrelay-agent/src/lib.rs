#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

pub mod backoff;
pub mod http_runtime;
pub mod normalize;
pub mod relay;

pub use backoff::Backoff;
pub use http_runtime::HttpAgentRuntime;
pub use normalize::normalize_runtime_event;
pub use relay::{SessionRelay, SessionSubscription};
