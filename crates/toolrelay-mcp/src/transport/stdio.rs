//! Newline-delimited JSON-RPC over a child's stdin/stdout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Transport, TransportError};
use crate::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Stdio transport. One request is in flight at a time; anything on stdout
/// that is not the awaited response (banner text, notifications, stale
/// replies to timed-out requests) is skipped.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<BoxedWriter>,
    reader: Mutex<LineReader>,
    next_id: AtomicU64,
}

/// Byte-oriented line reader. Servers are free to print anything, so lines
/// are decoded lossily instead of failing on invalid UTF-8. A partial line
/// survives a timed-out read in `pending`.
struct LineReader {
    inner: BufReader<BoxedReader>,
    pending: Vec<u8>,
}

impl LineReader {
    /// Next line, or `None` at end of stream.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let read = self.inner.read_until(b'\n', &mut self.pending).await?;
        if read == 0 && self.pending.is_empty() {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Ok(Some(line))
    }
}

impl StdioTransport {
    pub fn new<R, W>(server_name: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            server_name: server_name.into(),
            writer: Mutex::new(Box::new(writer)),
            reader: Mutex::new(LineReader {
                inner: BufReader::new(reader),
                pending: Vec::new(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    async fn write_line(&self, line: String) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        result.map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset => {
                TransportError::Closed
            }
            _ => TransportError::Io(e.to_string()),
        })
    }

    /// Read until the response to `id` arrives.
    async fn read_response(&self, id: u64) -> Result<JsonRpcMessage, TransportError> {
        let mut lines = self.reader.lock().await;
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?
                .ok_or(TransportError::Closed)?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let Ok(message) = serde_json::from_str::<JsonRpcMessage>(trimmed) else {
                debug!(server_name = %self.server_name, line = trimmed, "Skipping non-JSON-RPC output");
                continue;
            };

            if message.answers(id) {
                return Ok(message);
            }

            if message.method.as_deref() == Some("ping") {
                if let Some(ping_id) = message.id {
                    let pong = serde_json::json!({ "jsonrpc": "2.0", "id": ping_id, "result": {} });
                    self.write_line(pong.to_string()).await?;
                }
                continue;
            }

            debug!(
                server_name = %self.server_name,
                method = message.method.as_deref().unwrap_or("<response>"),
                "Skipping unrelated message while awaiting response {id}"
            );
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let exchange = async {
            self.write_line(line).await?;
            self.read_response(id).await
        };
        let message = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

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
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        self.write_line(line).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, duplex};

    /// Transport wired to an in-memory peer; returns (transport, peer reader, peer writer).
    fn pair() -> (
        StdioTransport,
        Lines<BufReader<tokio::io::DuplexStream>>,
        tokio::io::DuplexStream,
    ) {
        let (client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);
        let transport = StdioTransport::new("test", client_in, client_out);
        (transport, BufReader::new(server_in).lines(), server_out)
    }

    #[tokio::test]
    async fn skips_noise_and_unrelated_messages() {
        let (transport, mut requests, mut responses) = pair();

        let server = tokio::spawn(async move {
            let req = requests.next_line().await.unwrap().unwrap();
            assert!(req.contains(r#""method":"tools/list""#));
            responses
                .write_all(b"npx: installing...\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n{\"jsonrpc\":\"2.0\",\"id\":99,\"result\":{}}\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n")
                .await
                .unwrap();
        });

        let result = transport
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({ "tools": [] }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn skips_non_utf8_banner() {
        let (transport, mut requests, mut responses) = pair();
        let server = tokio::spawn(async move {
            let _req = requests.next_line().await.unwrap().unwrap();
            responses.write_all(b"\xff\xfe banner\n").await.unwrap();
            responses
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n")
                .await
                .unwrap();
        });

        let result = transport
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!({ "tools": [] }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn response_split_across_writes() {
        let (transport, mut requests, mut responses) = pair();
        tokio::spawn(async move {
            let _req = requests.next_line().await.unwrap().unwrap();
            responses.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,").await.unwrap();
            responses.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            responses.write_all(b"\"result\":{\"ok\":true}}").await.unwrap();
            // No trailing newline: the line ends with the stream.
        });

        let result = transport
            .request("initialize", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn maps_error_member() {
        let (transport, mut requests, mut responses) = pair();
        tokio::spawn(async move {
            let _ = requests.next_line().await;
            responses
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"error\":{\"code\":-32601,\"message\":\"Method not found\"}}\n")
                .await
                .unwrap();
        });

        let err = tokio_test::assert_err!(
            transport
                .request("tools/list", None, Duration::from_secs(5))
                .await
        );
        assert!(matches!(err, TransportError::Server { code: -32601, .. }));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (transport, _requests, _responses) = pair();
        let err = tokio_test::assert_err!(
            transport
                .request("initialize", None, Duration::from_millis(50))
                .await
        );
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn closed_stdout_reports_closed() {
        let (transport, requests, responses) = pair();
        drop(responses);
        drop(requests);
        let err = tokio_test::assert_err!(
            transport
                .request("initialize", None, Duration::from_secs(1))
                .await
        );
        assert!(matches!(err, TransportError::Closed | TransportError::Io(_)));
    }

    #[tokio::test]
    async fn answers_server_ping() {
        let (transport, mut requests, mut responses) = pair();
        let server = tokio::spawn(async move {
            let _req = requests.next_line().await.unwrap().unwrap();
            responses
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"p1\",\"method\":\"ping\"}\n")
                .await
                .unwrap();
            let pong = requests.next_line().await.unwrap().unwrap();
            assert!(pong.contains(r#""id":"p1""#));
            responses
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n")
                .await
                .unwrap();
        });

        let result = transport
            .request("initialize", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);
        server.await.unwrap();
    }
}
