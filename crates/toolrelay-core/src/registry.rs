//! In-memory configuration registry.
//!
//! Definitions can be seeded from a `servers.json` file. Changes made through
//! [`ServerRegistry::upsert`] and [`ServerRegistry::remove`] live only as long
//! as the process; nothing is written back.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::ServerDefinition;
use crate::ports::{RegistryError, ServerRegistry};

/// [`ServerRegistry`] backed by a map behind an async `RwLock`.
#[derive(Debug, Default)]
pub struct InMemoryServerRegistry {
    servers: RwLock<BTreeMap<String, ServerDefinition>>,
}

impl InMemoryServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions. Invalid ones are skipped.
    pub fn with_definitions(definitions: impl IntoIterator<Item = ServerDefinition>) -> Self {
        let mut servers = BTreeMap::new();
        for def in definitions {
            match def.validate() {
                Ok(()) => {
                    servers.insert(def.name.clone(), def);
                }
                Err(e) => warn!(server_name = %def.name, error = %e, "Skipping invalid server definition"),
            }
        }
        Self {
            servers: RwLock::new(servers),
        }
    }

    /// Load definitions from a JSON file.
    ///
    /// Accepted layouts:
    /// - `{ "<name>": { "config": { ... } } }`
    /// - `{ "<name>": { ... } }`
    /// - `[ { "name": ..., ... } ]`
    ///
    /// The map key fills in a missing `name`. Entries that fail to parse or
    /// validate are skipped with a warning.
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RegistryError::Internal(format!("{}: {e}", path.display())))?;
        let registry = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            count = registry.servers.read().await.len(),
            "Loaded tool server definitions"
        );
        Ok(registry)
    }

    /// Parse the layouts accepted by [`Self::from_json_file`].
    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let root: Value = serde_json::from_str(raw)
            .map_err(|e| RegistryError::Invalid(format!("servers file is not valid JSON: {e}")))?;

        let entries: Vec<(Option<String>, Value)> = match root {
            Value::Object(map) => map.into_iter().map(|(k, v)| (Some(k), v)).collect(),
            Value::Array(items) => items.into_iter().map(|v| (None, v)).collect(),
            _ => {
                return Err(RegistryError::Invalid(
                    "servers file must be an object or an array".to_string(),
                ));
            }
        };

        let mut definitions = Vec::with_capacity(entries.len());
        for (key, mut value) in entries {
            if let Some(config) = value.get_mut("config").map(Value::take) {
                value = config;
            }
            if let (Some(key), Value::Object(obj)) = (&key, &mut value) {
                obj.entry("name").or_insert_with(|| Value::String(key.clone()));
            }
            match serde_json::from_value::<ServerDefinition>(value) {
                Ok(def) => definitions.push(def),
                Err(e) => warn!(
                    server_name = key.as_deref().unwrap_or("<unnamed>"),
                    error = %e,
                    "Skipping unparseable server definition"
                ),
            }
        }

        Ok(Self::with_definitions(definitions))
    }
}

#[async_trait]
impl ServerRegistry for InMemoryServerRegistry {
    async fn get(&self, name: &str) -> Result<ServerDefinition, RegistryError> {
        self.servers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<ServerDefinition>, RegistryError> {
        Ok(self.servers.read().await.values().cloned().collect())
    }

    async fn upsert(&self, definition: ServerDefinition) -> Result<(), RegistryError> {
        definition.validate().map_err(RegistryError::Invalid)?;
        self.servers
            .write()
            .await
            .insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RegistryError> {
        self.servers
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransportKind;
    use std::io::Write;

    const SERVERS_JSON: &str = r#"{
        "calc-tool": {
            "config": {
                "name": "calc-tool",
                "description": "Arithmetic",
                "command": "calc-server",
                "args": ["--stdio"],
                "transport": "stdio",
                "env": { "CALC_PRECISION": "4" }
            }
        },
        "search": {
            "config": { "transport": "sse", "url": "http://localhost:3001/sse" }
        },
        "broken": { "config": { "transport": "stdio" } },
        "garbage": 42
    }"#;

    #[tokio::test]
    async fn loads_nested_config_layout() {
        let registry = InMemoryServerRegistry::from_json_str(SERVERS_JSON).unwrap();
        let all = registry.list().await.unwrap();

        let names: Vec<_> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["calc-tool", "search"]);

        let calc = registry.get("calc-tool").await.unwrap();
        assert_eq!(calc.args, vec!["--stdio"]);
        assert_eq!(calc.env["CALC_PRECISION"], "4");

        let search = registry.get("search").await.unwrap();
        assert_eq!(search.transport, TransportKind::Network);
    }

    #[tokio::test]
    async fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{ "name": "echo", "command": "cat" }]"#)
            .unwrap();

        let registry = InMemoryServerRegistry::from_json_file(file.path())
            .await
            .unwrap();
        assert_eq!(registry.get("echo").await.unwrap().command.as_deref(), Some("cat"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let result = InMemoryServerRegistry::from_json_file("/nonexistent/servers.json").await;
        assert!(matches!(result, Err(RegistryError::Internal(_))));
    }

    #[tokio::test]
    async fn upsert_validates_and_remove_reports_missing() {
        let registry = InMemoryServerRegistry::new();
        let bad = ServerDefinition {
            name: "bad".into(),
            ..ServerDefinition::default()
        };
        assert!(matches!(
            registry.upsert(bad).await,
            Err(RegistryError::Invalid(_))
        ));

        registry
            .upsert(ServerDefinition::stdio("calc-tool", "calc-server"))
            .await
            .unwrap();
        registry.remove("calc-tool").await.unwrap();
        assert!(matches!(
            registry.remove("calc-tool").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn rejects_scalar_root() {
        tokio_test::assert_err!(InMemoryServerRegistry::from_json_str("42"));
    }
}
