//! SSE events handler - real-time event streaming.
//!
//! Streams tool-server and session lifecycle events to connected clients.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures_util::stream::Stream;

use crate::state::AppState;

/// `GET /api/events`
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    state.sse.clone().subscribe()
}
