//! JSON-RPC over HTTP for network-endpoint tool servers.
//!
//! Each request is a POST of one JSON-RPC message. The server answers with
//! either `application/json` or a `text/event-stream` body whose `data:`
//! lines carry the response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Transport, TransportError};
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

const SESSION_HEADER: &str = "mcp-session-id";

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    /// Session id handed out by the server on `initialize`.
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(
        &self,
        body: String,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(session) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| map_reqwest_error(&e, timeout))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::Unavailable(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(TransportError::Rejected(format!("HTTP {status}")));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write().await = Some(session.to_string());
        }

        Ok(response)
    }
}

fn map_reqwest_error(error: &reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout.unwrap_or_default())
    } else if error.is_connect() {
        TransportError::Unavailable(error.to_string())
    } else {
        TransportError::Io(error.to_string())
    }
}

/// Pick the response to `id` out of a response body.
fn parse_body(body: &str, event_stream: bool, id: u64) -> Result<JsonRpcMessage, TransportError> {
    if event_stream {
        return body
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .filter_map(|data| serde_json::from_str::<JsonRpcMessage>(data.trim()).ok())
            .find(|message| message.answers(id))
            .ok_or_else(|| TransportError::Malformed(format!("no response to request {id} in event stream")));
    }

    let message: JsonRpcMessage = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("invalid JSON-RPC body: {e}")))?;
    if message.answers(id) {
        Ok(message)
    } else {
        Err(TransportError::Malformed(format!(
            "response does not answer request {id}"
        )))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let exchange = async {
            let response = self.post(body, Some(timeout)).await?;
            let event_stream = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("text/event-stream"));
            let text = response
                .text()
                .await
                .map_err(|e| map_reqwest_error(&e, Some(timeout)))?;
            parse_body(&text, event_stream, id)
        };
        let message = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        debug!(url = %self.url, method, "Received JSON-RPC response");

        if let Some(err) = message.error {
            return Err(TransportError::Server {
                code: err.code,
                message: err.message,
            });
        }
        message
            .result
            .ok_or_else(|| TransportError::Malformed("response has neither result nor error".into()))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.post(body, None).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_body() {
        let msg = parse_body(r#"{"jsonrpc":"2.0","id":3,"result":{"tools":[]}}"#, false, 3).unwrap();
        assert!(msg.result.is_some());
        assert!(parse_body(r#"{"jsonrpc":"2.0","id":4,"result":{}}"#, false, 3).is_err());
    }

    #[test]
    fn parses_event_stream_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\nevent: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        let msg = parse_body(body, true, 1).unwrap();
        assert_eq!(msg.result.unwrap()["ok"], true);
    }

    #[test]
    fn garbage_body_is_malformed() {
        assert!(matches!(
            parse_body("<html>oops</html>", false, 1),
            Err(TransportError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_transient() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let transport = HttpTransport::new("http://127.0.0.1:9/mcp");
        let err = transport
            .request("initialize", None, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_transient() || matches!(err, TransportError::Timeout(_)));
    }
}
