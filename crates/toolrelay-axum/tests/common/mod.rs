//! Shared helpers for router tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use toolrelay_axum::bootstrap::{AxumContext, ServerConfig, bootstrap};
use toolrelay_axum::routes::create_router;

/// Definitions loaded by every test router. `calc-tool` is never started.
pub const SERVERS_JSON: &str = r#"{
    "calc-tool": { "config": { "command": "calc-server", "args": ["--stdio"], "transport": "stdio" } },
    "search": { "config": { "transport": "sse", "url": "http://127.0.0.1:9/sse" } }
}"#;

pub struct TestApp {
    pub ctx: Arc<AxumContext>,
    pub router: Router,
    _servers_file: NamedTempFile,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::with_defaults()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SERVERS_JSON.as_bytes()).unwrap();
        let config = config.with_servers_file(file.path());

        let ctx = Arc::new(bootstrap(&config).await.expect("bootstrap"));
        let router = create_router(ctx.clone());
        Self {
            ctx,
            router,
            _servers_file: file,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, json)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.request(Method::POST, uri, body).await
    }
}
