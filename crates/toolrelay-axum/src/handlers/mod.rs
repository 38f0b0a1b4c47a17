//! HTTP and WebSocket handlers.
//!
//! Each module owns one surface:
//! - `servers` - tool-server registry and control operations
//! - `sessions` - active streaming sessions
//! - `events` - SSE lifecycle feed
//! - `chat_ws` - the streaming chat socket

pub mod chat_ws;
pub mod events;
pub mod servers;
pub mod sessions;
