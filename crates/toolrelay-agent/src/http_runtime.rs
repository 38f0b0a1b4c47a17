//! [`AgentRuntime`] backed by an external agent service over HTTP.
//!
//! - `POST {base}/sessions` starts a run; the response body is the event stream
//! - `GET {base}/sessions/{id}/events?after=n` re-subscribes to a live run
//! - `DELETE {base}/sessions/{id}` abandons a run
//!
//! Bodies may be newline-delimited JSON or server-sent events. Every line is
//! passed through [`normalize_runtime_event`] before it reaches the relay.
//! The resume cursor counts every JSON event in the body, including ones that
//! normalize to nothing, because that is how the agent service numbers them.

use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use toolrelay_core::{
    AgentRequest, AgentRuntime, RuntimeError, RuntimeEvent, RuntimeStream, StreamEvent,
};
use tracing::{debug, warn};

use crate::normalize::normalize_runtime_event;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentRuntime {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RuntimeError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn session_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{session_id}", self.base_url)
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn open(&self, request: &AgentRequest) -> Result<RuntimeStream, RuntimeError> {
        let url = format!("{}/sessions", self.base_url);
        debug!(session_id = %request.session_id, %url, "Opening runtime session");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(event_stream(response, 0)),
            StatusCode::CONFLICT | StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(RuntimeError::Rejected(error_text(response).await))
            }
            status if status.is_server_error() => Err(RuntimeError::Disconnected(format!(
                "runtime returned {status}"
            ))),
            _ => Err(RuntimeError::Transport(error_text(response).await)),
        }
    }

    async fn resume(&self, session_id: &str, after: usize) -> Result<RuntimeStream, RuntimeError> {
        let url = format!("{}/events", self.session_url(session_id));
        let response = self
            .client
            .get(&url)
            .query(&[("after", after)])
            .send()
            .await
            // Still unreachable: worth another attempt.
            .map_err(|e| RuntimeError::Disconnected(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(event_stream(response, after)),
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Err(RuntimeError::Gone(format!("session {session_id} is no longer available")))
            }
            status if status.is_server_error() => Err(RuntimeError::Disconnected(format!(
                "runtime returned {status}"
            ))),
            _ => Err(RuntimeError::Rejected(error_text(response).await)),
        }
    }

    async fn cancel(&self, session_id: &str) {
        match self.client.delete(self.session_url(session_id)).send().await {
            Ok(response)
                if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => {
                warn!(session_id, status = %response.status(), "Runtime rejected cancel");
            }
            Err(e) => {
                warn!(session_id, error = %e, "Failed to send cancel to runtime");
            }
        }
    }
}

async fn error_text(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) if !body.trim().is_empty() => format!("{status}: {}", body.trim()),
        _ => status.to_string(),
    }
}

/// One line of a response body.
#[derive(Debug, PartialEq)]
enum Line {
    Event(StreamEvent),
    /// A runtime event with nothing to relay. Still advances the cursor.
    Dropped,
    Done,
    /// Framing or noise; not a runtime event.
    Skip,
}

fn parse_line(line: &str) -> Line {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Line::Skip;
    }
    // SSE framing: only `data:` lines carry payload.
    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") => {
            return Line::Skip;
        }
        None => line,
    };
    if payload == "[DONE]" {
        return Line::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(raw) => normalize_runtime_event(&raw).map_or(Line::Dropped, Line::Event),
        Err(e) => {
            debug!(error = %e, "Skipping unparseable runtime line");
            Line::Skip
        }
    }
}

/// Stream the body's events, numbering them from `cursor`.
fn event_stream(response: reqwest::Response, mut cursor: usize) -> RuntimeStream {
    let mut body = response.bytes_stream();
    Box::pin(stream! {
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=newline).collect();
                        match parse_line(&String::from_utf8_lossy(&line)) {
                            Line::Event(event) => {
                                cursor += 1;
                                yield Ok(RuntimeEvent::new(event, cursor));
                            }
                            Line::Dropped => cursor += 1,
                            Line::Done => {
                                yield Ok(RuntimeEvent::new(StreamEvent::End, cursor));
                                return;
                            }
                            Line::Skip => {}
                        }
                    }
                }
                Some(Err(e)) => {
                    yield Err(RuntimeError::Disconnected(e.to_string()));
                    return;
                }
                None => {
                    match parse_line(&String::from_utf8_lossy(&buffer)) {
                        Line::Event(event) => yield Ok(RuntimeEvent::new(event, cursor + 1)),
                        Line::Done => yield Ok(RuntimeEvent::new(StreamEvent::End, cursor)),
                        Line::Dropped | Line::Skip => {}
                    }
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use toolrelay_core::{ChatRequest, NoopEmitter, RelaySettings};

    use crate::SessionRelay;

    #[test]
    fn parses_ndjson_and_sse_lines() {
        assert_eq!(
            parse_line(r#"{"type":"token","data":"Hel"}"#),
            Line::Event(StreamEvent::token("Hel"))
        );
        assert_eq!(
            parse_line(r#"data: {"event":"on_chat_model_stream","data":{"chunk":{"content":"lo"}}}"#),
            Line::Event(StreamEvent::token("lo"))
        );
        assert_eq!(parse_line("event: message"), Line::Skip);
        assert_eq!(parse_line(": keep-alive"), Line::Skip);
        assert_eq!(parse_line("data: [DONE]"), Line::Done);
        assert_eq!(parse_line("not json"), Line::Skip);
        assert_eq!(parse_line(r#"{"type":"heartbeat"}"#), Line::Dropped);
    }

    /// Serve one canned HTTP response and close.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 8192];
            let _ = socket.read(&mut request).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/x-ndjson\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}")
    }

    fn request() -> AgentRequest {
        AgentRequest {
            session_id: "s1".into(),
            prompt: "add 1 and 2".into(),
            tools: BTreeMap::new(),
            model_selector: None,
        }
    }

    #[tokio::test]
    async fn open_streams_normalized_events() {
        let base = serve_once(
            "200 OK",
            "{\"type\":\"token\",\"data\":\"Hel\"}\n{\"type\":\"heartbeat\"}\n{\"event\":\"text\",\"text\":\"lo\"}\n{\"type\":\"end\"}\n",
        )
        .await;
        let runtime = HttpAgentRuntime::new(base).unwrap();

        let events: Vec<RuntimeEvent> = runtime
            .open(&request())
            .await
            .unwrap()
            .map(Result::unwrap)
            .collect()
            .await;
        // The heartbeat is not relayed but still counts.
        assert_eq!(
            events,
            vec![
                RuntimeEvent::new(StreamEvent::token("Hel"), 1),
                RuntimeEvent::new(StreamEvent::token("lo"), 3),
                RuntimeEvent::new(StreamEvent::End, 4),
            ]
        );
    }

    #[tokio::test]
    async fn resume_of_finished_run_is_gone() {
        let base = serve_once("410 Gone", "").await;
        let runtime = HttpAgentRuntime::new(base).unwrap();
        let Err(err) = runtime.resume("s1", 3).await else {
            panic!("expected resume to fail");
        };
        assert!(matches!(err, RuntimeError::Gone(_)));
    }

    #[tokio::test]
    async fn unreachable_resume_is_reconnectable() {
        let runtime = HttpAgentRuntime::new("http://127.0.0.1:9").unwrap();
        let Err(err) = runtime.resume("s1", 0).await else {
            panic!("expected resume to fail");
        };
        assert!(err.is_reconnectable());
    }

    const RUN: [&str; 4] = [
        r#"{"type":"heartbeat"}"#,
        r#"{"type":"token","data":"Hel"}"#,
        r#"{"type":"token","data":"lo"}"#,
        r#"{"type":"end"}"#,
    ];

    /// Agent service whose first response breaks off after two raw events.
    /// Re-subscribing replays the run from the `after` query; every `after`
    /// seen is recorded.
    async fn serve_interrupted_run(resumed_after: Arc<Mutex<Vec<usize>>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = vec![0u8; 8192];
                let read = socket.read(&mut request).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&request[..read]).to_string();
                let request_line = head.lines().next().unwrap_or_default();

                let events: &[&str] = if request_line.starts_with("POST") {
                    &RUN[..2]
                } else {
                    let after: usize = request_line
                        .split("after=")
                        .nth(1)
                        .and_then(|rest| rest.split(' ').next())
                        .and_then(|n| n.parse().ok())
                        .unwrap_or(0);
                    resumed_after.lock().unwrap().push(after);
                    &RUN[after.min(RUN.len())..]
                };
                let body: String = events.iter().map(|e| format!("{e}\n")).collect();
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn relay_resume_counts_unrelayed_events() {
        let resumed_after = Arc::new(Mutex::new(Vec::new()));
        let base = serve_interrupted_run(resumed_after.clone()).await;
        let runtime = Arc::new(HttpAgentRuntime::new(base).unwrap());
        let settings = RelaySettings::default().with_backoff(
            Duration::from_millis(10),
            Duration::from_millis(40),
            3,
        );
        let relay = SessionRelay::new(runtime, settings, Arc::new(NoopEmitter::new()));

        let mut sub = relay.open(ChatRequest::new("s1", "greet")).await.unwrap();
        let mut tokens = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("session stalled")
        {
            sub.ack();
            if let StreamEvent::Token(text) = event {
                tokens.push(text);
            }
        }

        assert_eq!(tokens, vec!["Hel", "lo"]);
        assert_eq!(*resumed_after.lock().unwrap(), vec![2]);
    }
}
