//! Tool-server definitions and capability metadata.
//!
//! A [`ServerDefinition`] is what the configuration registry hands to the
//! supervisor; a [`Capability`] is what discovery hands back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the supervisor talks to a started tool server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON-RPC over the child's stdin/stdout pipes.
    #[default]
    Stdio,
    /// JSON-RPC over HTTP to `url`.
    #[serde(alias = "sse", alias = "http")]
    Network,
}

impl TransportKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launch definition of a tool server, as stored by the configuration registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDefinition {
    /// Unique key of the server.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Executable to launch. Required for stdio servers; optional for
    /// network servers that are already running elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub transport: TransportKind,

    /// Endpoint for network servers (e.g. `http://127.0.0.1:3001/mcp`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Working directory for the child process (must exist if set).
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "working_dir")]
    pub cwd: Option<String>,

    /// Extra environment, layered over the supervisor's own environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Start this server when the application boots.
    #[serde(default)]
    pub auto_start: bool,
}

impl ServerDefinition {
    /// Create a stdio server definition.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    /// Create a network server definition.
    pub fn network(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Network,
            url: Some(url.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub const fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// Whether the supervisor launches a child process for this server.
    pub const fn spawns_process(&self) -> bool {
        self.command.is_some()
    }

    /// Validate the definition for its transport kind.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if let Some(command) = &self.command {
            if command.trim().is_empty() {
                return Err("Command cannot be empty".to_string());
            }
        }

        match self.transport {
            TransportKind::Stdio => {
                if self.command.is_none() {
                    return Err("Stdio servers require a command".to_string());
                }
            }
            TransportKind::Network => match self.url.as_deref() {
                None => return Err("Network servers require a url".to_string()),
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    return Err(format!("Unsupported url scheme: {url}"));
                }
                Some(_) => {}
            },
        }

        Ok(())
    }
}

/// One callable operation exposed by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Name, unique within its server.
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the capability's arguments.
    #[serde(default = "empty_object_schema", alias = "inputSchema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema: empty_object_schema(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_requires_command() {
        let def = ServerDefinition {
            name: "calc-tool".into(),
            ..ServerDefinition::default()
        };
        assert!(def.validate().is_err());
        assert!(ServerDefinition::stdio("calc-tool", "calc-server").validate().is_ok());
    }

    #[test]
    fn network_requires_http_url() {
        assert!(ServerDefinition::network("web", "http://127.0.0.1:3001/mcp").validate().is_ok());
        assert!(ServerDefinition::network("web", "ftp://example").validate().is_err());

        let mut def = ServerDefinition::network("web", "http://x");
        def.url = None;
        assert!(def.validate().is_err());
    }

    #[test]
    fn blank_name_rejected() {
        assert!(ServerDefinition::stdio("  ", "calc-server").validate().is_err());
    }

    #[test]
    fn sse_alias_maps_to_network() {
        let def: ServerDefinition = serde_json::from_value(serde_json::json!({
            "name": "remote",
            "transport": "sse",
            "url": "http://localhost:3001/sse"
        }))
        .unwrap();
        assert_eq!(def.transport, TransportKind::Network);
        assert!(def.args.is_empty());
    }

    #[test]
    fn capability_accepts_wire_field_name() {
        let cap: Capability = serde_json::from_value(serde_json::json!({
            "name": "add",
            "inputSchema": { "type": "object", "properties": { "a": { "type": "number" } } }
        }))
        .unwrap();
        assert_eq!(cap.name, "add");
        assert_eq!(cap.input_schema["properties"]["a"]["type"], "number");

        let out = serde_json::to_value(&cap).unwrap();
        assert!(out.get("input_schema").is_some());
        assert!(out.get("description").is_none());
    }
}
