//! Capability discovery client.
//!
//! Runs the `initialize` handshake (the readiness signal) and the
//! `tools/list` exchange against any [`Transport`]. Individual malformed
//! capability entries are skipped; a response whose envelope cannot be read
//! as a capability list fails discovery.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use toolrelay_core::{Capability, SupervisorError, SupervisorSettings};
use tracing::{debug, warn};

use crate::protocol::PROTOCOL_VERSION;
use crate::transport::{Transport, TransportError};

/// Upper bound on `tools/list` pages followed through `nextCursor`.
const MAX_PAGES: usize = 32;

/// Result of the `initialize` handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerHandshake {
    pub protocol_version: Option<String>,
    pub server_name: Option<String>,
    pub server_version: Option<String>,
    /// Whether the server advertised the `tools` capability.
    pub supports_tools: bool,
}

/// Discovery client bound to one server's transport.
pub struct DiscoveryClient {
    server_name: String,
    transport: Arc<dyn Transport>,
    settings: SupervisorSettings,
    supports_tools: AtomicBool,
}

impl DiscoveryClient {
    pub fn new(
        server_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            transport,
            settings,
            supports_tools: AtomicBool::new(true),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Perform the `initialize` handshake.
    ///
    /// Transient transport errors (endpoint not listening yet) are retried
    /// until `readiness_timeout` has elapsed.
    pub async fn handshake(&self) -> Result<ServerHandshake, SupervisorError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {
                "name": "toolrelay",
                "version": env!("CARGO_PKG_VERSION")
            },
            "capabilities": {}
        });

        let budget = self.settings.readiness_timeout;
        let deadline = Instant::now() + budget;
        let mut delay = self.settings.retry_base_delay;

        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(not_ready(budget));
            }
            match self
                .transport
                .request("initialize", Some(params.clone()), remaining)
                .await
            {
                Ok(result) => break result,
                Err(e) if e.is_transient() => {
                    debug!(server_name = %self.server_name, error = %e, "Server not ready yet");
                    sleep(delay.min(deadline.saturating_duration_since(Instant::now()))).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                }
                Err(TransportError::Timeout(_)) => return Err(not_ready(budget)),
                Err(e) => {
                    return Err(SupervisorError::SpawnFailure(format!(
                        "initialize handshake failed: {e}"
                    )));
                }
            }
        };

        let handshake = parse_handshake(&result);
        self.supports_tools
            .store(handshake.supports_tools, Ordering::SeqCst);

        self.transport
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| SupervisorError::Transport(e.to_string()))?;

        Ok(handshake)
    }

    /// Enumerate the server's capabilities.
    ///
    /// Each exchange is bounded by `discovery_timeout`; transient errors are
    /// retried up to `discovery_retries` times with doubling delay.
    pub async fn discover(&self) -> Result<Vec<Capability>, SupervisorError> {
        if !self.supports_tools.load(Ordering::SeqCst) {
            debug!(server_name = %self.server_name, "Server does not advertise tools");
            return Ok(Vec::new());
        }

        let mut capabilities = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = self.list_page(params).await?;
            let next = parse_capability_page(&self.server_name, &page, &mut seen, &mut capabilities)?;
            match next {
                Some(next) => cursor = Some(next),
                None => return Ok(capabilities),
            }
        }

        warn!(
            server_name = %self.server_name,
            pages = MAX_PAGES,
            "Stopped following capability pages"
        );
        Ok(capabilities)
    }

    async fn list_page(&self, params: Option<Value>) -> Result<Value, SupervisorError> {
        let timeout = self.settings.discovery_timeout;
        let mut delay = self.settings.retry_base_delay;
        let mut attempt: u8 = 0;

        loop {
            match self
                .transport
                .request("tools/list", params.clone(), timeout)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempt < self.settings.discovery_retries => {
                    attempt += 1;
                    warn!(
                        server_name = %self.server_name,
                        attempt,
                        error = %e,
                        "Transient error during discovery, retrying"
                    );
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(discovery_error(e, timeout)),
            }
        }
    }

    /// Invoke a capability. The payload is passed through untouched.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, SupervisorError> {
        let timeout = self.settings.discovery_timeout;
        self.transport
            .request(
                "tools/call",
                Some(json!({ "name": tool, "arguments": arguments })),
                timeout,
            )
            .await
            .map_err(|e| match e {
                TransportError::Timeout(_) => SupervisorError::Transport(format!(
                    "tool '{tool}' did not answer within {}s",
                    timeout.as_secs()
                )),
                other => SupervisorError::Transport(other.to_string()),
            })
    }
}

fn not_ready(budget: Duration) -> SupervisorError {
    SupervisorError::SpawnFailure(format!(
        "server did not become ready within {}s",
        budget.as_secs()
    ))
}

fn discovery_error(error: TransportError, timeout: Duration) -> SupervisorError {
    match error {
        TransportError::Timeout(_) => SupervisorError::DiscoveryTimeout(timeout.as_secs()),
        TransportError::Malformed(msg) => SupervisorError::DiscoveryParseError(msg),
        other => SupervisorError::Transport(other.to_string()),
    }
}

fn parse_handshake(result: &Value) -> ServerHandshake {
    let text = |v: Option<&Value>| v.and_then(Value::as_str).map(str::to_string);
    ServerHandshake {
        protocol_version: text(result.get("protocolVersion")),
        server_name: text(result.pointer("/serverInfo/name")),
        server_version: text(result.pointer("/serverInfo/version")),
        // Servers that omit the capabilities object are still asked for tools.
        supports_tools: result
            .get("capabilities")
            .is_none_or(|caps| caps.get("tools").is_some()),
    }
}

/// Append the valid entries of one `tools/list` page to `out`.
///
/// Returns the `nextCursor` if the server paginates.
pub fn parse_capability_page(
    server_name: &str,
    page: &Value,
    seen: &mut HashSet<String>,
    out: &mut Vec<Capability>,
) -> Result<Option<String>, SupervisorError> {
    let entries = page
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            SupervisorError::DiscoveryParseError(format!(
                "expected an object with a `tools` array, got: {}",
                truncate(&page.to_string(), 200)
            ))
        })?;

    for (index, entry) in entries.iter().enumerate() {
        match parse_capability(entry) {
            Ok(capability) => {
                if seen.insert(capability.name.clone()) {
                    out.push(capability);
                } else {
                    warn!(server_name, capability = %capability.name, "Skipping duplicate capability");
                }
            }
            Err(reason) => {
                warn!(server_name, index, reason, "Skipping malformed capability entry");
            }
        }
    }

    Ok(page
        .get("nextCursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

fn parse_capability(entry: &Value) -> Result<Capability, &'static str> {
    let obj = entry.as_object().ok_or("entry is not an object")?;

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or("missing or empty name")?;

    let description = match obj.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return Err("description is not a string"),
    };

    let input_schema = match obj.get("inputSchema").or_else(|| obj.get("input_schema")) {
        None | Some(Value::Null) => json!({ "type": "object" }),
        Some(schema @ Value::Object(_)) => schema.clone(),
        Some(_) => return Err("inputSchema is not an object"),
    };

    let mut capability = Capability::new(name).with_input_schema(input_schema);
    capability.description = description;
    Ok(capability)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
