//! SSE event broadcaster for real-time event streaming.
//!
//! Implements the core [`AppEventEmitter`] port so the supervisor and the
//! relay can publish lifecycle events that are streamed to every connected
//! `/api/events` client.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use toolrelay_core::{AppEvent, AppEventEmitter};

/// SSE broadcaster that implements the event emitter port.
///
/// Events are sent via a broadcast channel. Slow clients may miss events if
/// the buffer overflows; they are logged and skipped.
#[derive(Debug, Clone)]
pub struct SseBroadcaster {
    sender: broadcast::Sender<AppEvent>,
}

impl SseBroadcaster {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcaster with room for 256 buffered events.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(256)
    }

    /// Receiver for tests and in-process consumers.
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Create an SSE stream for a new client connection.
    ///
    /// Each event is named after [`AppEvent::event_name`] and carries the
    /// JSON form of the event. A keep-alive ping is sent every 30 seconds.
    pub fn subscribe(
        self: Arc<Self>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|result| {
            match result {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => Some(Ok(Event::default().event(event.event_name()).data(json))),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to serialize event");
                        None
                    }
                },
                Err(e) => {
                    tracing::debug!(error = %e, "SSE subscriber lagged");
                    None
                }
            }
        });

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(30))
                .text("ping"),
        )
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl AppEventEmitter for SseBroadcaster {
    fn emit(&self, event: AppEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    fn clone_box(&self) -> Box<dyn AppEventEmitter> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_reach_every_receiver() {
        let broadcaster = SseBroadcaster::new(8);
        let mut first = broadcaster.receiver();
        let mut second = broadcaster.receiver();
        assert_eq!(broadcaster.subscriber_count(), 2);

        broadcaster.emit(AppEvent::server_stopped("calc-tool"));

        assert_eq!(first.recv().await.unwrap(), AppEvent::server_stopped("calc-tool"));
        assert_eq!(second.recv().await.unwrap().event_name(), "server:stopped");
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        SseBroadcaster::with_defaults().emit(AppEvent::session_opened("s1"));
    }
}
