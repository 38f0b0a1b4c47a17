//! WebSocket handler for streaming chat sessions.
//!
//! `GET /ws/chat` upgrades to a text WebSocket carrying JSON envelopes.
//!
//! ## Protocol
//!
//! | Direction | Content |
//! |---|---|
//! | Server → Client | `{"type":"info","data":{"status":"connected"}}` on upgrade |
//! | Client → Server | one `ChatRequest`: `{session_id, prompt, tools_config, model_selector?, resume?}` |
//! | Server → Client | `{"type":"info","data":{"status":"streaming","session_id":...}}` once the session is open |
//! | Server → Client | `{"type":"token"\|"final"\|"error"\|"info"\|"end","data":...}` until `end` or `error` |
//! | Client → Server | `{"type":"cancel"}` to abandon the session |
//!
//! A request the relay rejects as recoverable (empty prompt, duplicate id)
//! is answered with a recoverable `error` and the socket stays open for
//! another request. Each event is acknowledged to the relay only after it
//! was written to the socket, so a client that reconnects with
//! `resume: true` continues after the last event it actually received.
//!
//! A close frame cancels the session. A dropped connection only detaches;
//! the session keeps running for the re-attach window.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use toolrelay_agent::{SessionRelay, SessionSubscription};
use toolrelay_core::{ChatRequest, StreamEnvelope, StreamEvent};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// `GET /ws/chat`
pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_chat_ws(socket, state))
}

async fn handle_chat_ws(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    serve_chat(&state.relay, sender, receiver).await;
}

/// Control frames accepted while a session is streaming.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Cancel,
}

fn is_cancel(text: &str) -> bool {
    matches!(serde_json::from_str::<ClientFrame>(text), Ok(ClientFrame::Cancel))
}

/// Drive one chat connection over any message sink/stream pair.
pub(crate) async fn serve_chat<S, R>(relay: &SessionRelay, mut sender: S, mut receiver: R)
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let connected = StreamEvent::Info(json!({ "status": "connected" }));
    if send_event(&mut sender, connected).await.is_err() {
        return;
    }

    let Some(mut subscription) = open_session(relay, &mut sender, &mut receiver).await else {
        let _ = sender.send(Message::Close(None)).await;
        return;
    };
    let session_id = subscription.session_id().to_string();

    let streaming = StreamEvent::Info(json!({ "status": "streaming", "session_id": session_id }));
    if send_event(&mut sender, streaming).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                let terminal = event.is_terminal();
                if let Err(e) = send_event(&mut sender, event).await {
                    debug!(session_id = %session_id, error = %e, "Client transport dropped; session detached");
                    return;
                }
                subscription.ack();
                if terminal {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_cancel(text.as_str()) {
                        info!(session_id = %session_id, "Client requested cancel");
                        relay.cancel(&session_id);
                    } else {
                        debug!(session_id = %session_id, "Ignoring unexpected client frame");
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!(session_id = %session_id, "Client closed socket; cancelling session");
                    relay.cancel(&session_id);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session_id = %session_id, error = %e, "Socket error; session detached");
                    return;
                }
                None => {
                    debug!(session_id = %session_id, "Socket ended; session detached");
                    return;
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Read requests until one opens (or re-attaches) a session.
///
/// Returns `None` when the client goes away or a request fails for good.
async fn open_session<S, R>(
    relay: &SessionRelay,
    sender: &mut S,
    receiver: &mut R,
) -> Option<SessionSubscription>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let text = match receiver.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "Socket error before session opened");
                return None;
            }
        };

        let request: ChatRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                let error = StreamEvent::error(format!("Invalid request: {e}"), true);
                if send_event(sender, error).await.is_err() {
                    return None;
                }
                continue;
            }
        };

        match relay.open(request).await {
            Ok(subscription) => return Some(subscription),
            Err(e) => {
                let recoverable = e.is_recoverable();
                warn!(kind = %e.kind(), error = %e, recoverable, "Session request rejected");
                let sent = send_event(sender, StreamEvent::error(e.to_string(), recoverable)).await;
                if sent.is_err() || !recoverable {
                    return None;
                }
            }
        }
    }
}

async fn send_event<S>(sender: &mut S, event: StreamEvent) -> Result<(), axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let json = serde_json::to_string(&StreamEnvelope::from(event)).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}
