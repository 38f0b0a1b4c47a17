//! Streaming chat vocabulary.
//!
//! Every upstream runtime event is normalized into [`StreamEvent`] once, at
//! the runtime boundary. Clients receive each event as a `{type, data}`
//! envelope.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::server::Capability;

/// Normalized event delivered to a streaming client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StreamEnvelope", try_from = "StreamEnvelope")]
pub enum StreamEvent {
    /// Incremental text fragment.
    Token(String),
    /// Complete message that supersedes the concatenated tokens.
    Final(String),
    Error(StreamError),
    /// Progress or status information (tool calls, resume markers, ...).
    Info(Value),
    /// Stream finished cleanly.
    End,
}

impl StreamEvent {
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token(text.into())
    }

    pub fn final_message(text: impl Into<String>) -> Self {
        Self::Final(text.into())
    }

    pub fn error(error: impl Into<String>, recoverable: bool) -> Self {
        Self::Error(StreamError {
            error: error.into(),
            recoverable,
        })
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Final(_) => "final",
            Self::Error(_) => "error",
            Self::Info(_) => "info",
            Self::End => "end",
        }
    }

    /// Whether the session is over once this event is delivered.
    pub const fn is_terminal(&self) -> bool {
        match self {
            Self::End => true,
            Self::Error(e) => !e.recoverable,
            _ => false,
        }
    }
}

/// Payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamError {
    pub error: String,
    #[serde(default)]
    pub recoverable: bool,
}

/// Wire form of a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl From<StreamEvent> for StreamEnvelope {
    fn from(event: StreamEvent) -> Self {
        let kind = event.kind().to_string();
        let data = match event {
            StreamEvent::Token(text) | StreamEvent::Final(text) => Value::String(text),
            StreamEvent::Error(err) => serde_json::json!({
                "error": err.error,
                "recoverable": err.recoverable,
            }),
            StreamEvent::Info(value) => value,
            StreamEvent::End => Value::String("complete".to_string()),
        };
        Self { kind, data }
    }
}

impl TryFrom<StreamEnvelope> for StreamEvent {
    type Error = String;

    fn try_from(envelope: StreamEnvelope) -> Result<Self, String> {
        let text = |data: Value| match data {
            Value::String(s) => Ok(s),
            other => Err(format!("expected string data, got {other}")),
        };
        match envelope.kind.as_str() {
            "token" => text(envelope.data).map(Self::Token),
            "final" => text(envelope.data).map(Self::Final),
            "error" => serde_json::from_value(envelope.data)
                .map(StreamEvent::Error)
                .map_err(|e| e.to_string()),
            "info" => Ok(Self::Info(envelope.data)),
            "end" => Ok(Self::End),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// Initial payload sent by a client to open (or resume) a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Caller-supplied id; generated when empty.
    #[serde(default)]
    pub session_id: String,

    #[serde(default)]
    pub prompt: String,

    /// Selected capabilities per server. An empty list selects every
    /// capability the server currently advertises.
    #[serde(default)]
    pub tools_config: BTreeMap<String, Vec<Capability>>,

    #[serde(default, alias = "llm_config_id", skip_serializing_if = "Option::is_none")]
    pub model_selector: Option<String>,

    /// Re-attach to an existing session instead of opening a new one.
    #[serde(default)]
    pub resume: bool,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Resume request for an existing session.
    pub fn resume(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            resume: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tools(mut self, server: impl Into<String>, capabilities: Vec<Capability>) -> Self {
        self.tools_config.insert(server.into(), capabilities);
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_selector = Some(model.into());
        self
    }
}

/// What the agent runtime is invoked with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub session_id: String,
    pub prompt: String,
    /// Active capability set, keyed by server name.
    pub tools: BTreeMap<String, Vec<Capability>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_selector: Option<String>,
}

/// Lifecycle of one streaming session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Connecting,
    Open,
    Streaming,
    Completed,
    Errored,
    Closed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Closed => "closed",
        }
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Closed, Completed, Connecting, Errored, Open, Streaming};
        matches!(
            (self, next),
            (Connecting, Open | Errored | Closed)
                | (Open, Streaming | Completed | Errored | Closed)
                | (Streaming, Completed | Errored | Closed)
                | (Completed | Errored, Closed)
        )
    }

    /// Upstream has finished, one way or another.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
