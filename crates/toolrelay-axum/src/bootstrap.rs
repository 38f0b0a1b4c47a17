//! Axum server bootstrap - the composition root.
//!
//! This module is the only place where concrete adapters are wired
//! together: the configuration registry, the process supervisor, the agent
//! runtime client, the session relay and the SSE broadcaster.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use toolrelay_agent::{HttpAgentRuntime, SessionRelay};
use toolrelay_core::{
    AgentRuntime, AppEventEmitter, InMemoryServerRegistry, RelaySettings, SupervisorSettings,
    validate_settings,
};
use toolrelay_mcp::ToolServerService;
use tracing::{info, warn};

use crate::sse::SseBroadcaster;

/// CORS configuration for the web server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CorsConfig {
    /// Allow all origins (development mode).
    #[default]
    AllowAll,
    /// Allow specific origins.
    AllowOrigins(Vec<String>),
}

/// Server configuration, from CLI flags or `TOOLRELAY_*` environment
/// variables (a `.env` file is loaded first by the binary).
#[derive(Debug, Clone, Parser)]
#[command(name = "toolrelay", version, about = "Tool-server supervisor and streaming agent relay")]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "TOOLRELAY_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the HTTP server.
    #[arg(long, env = "TOOLRELAY_PORT", default_value_t = 9887)]
    pub port: u16,

    /// JSON file with tool server definitions.
    #[arg(long, env = "TOOLRELAY_SERVERS_FILE")]
    pub servers_file: Option<PathBuf>,

    /// Base URL of the agent runtime.
    #[arg(long, env = "TOOLRELAY_AGENT_URL", default_value = "http://127.0.0.1:8000")]
    pub agent_url: String,

    /// Allowed CORS origins; all origins are allowed when empty.
    #[arg(long = "allow-origin", env = "TOOLRELAY_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Seconds a session may go without a runtime event.
    #[arg(long, env = "TOOLRELAY_IDLE_TIMEOUT_SECS", default_value_t = 180)]
    pub idle_timeout_secs: u64,

    /// Reconnect attempts before a session is failed.
    #[arg(long, env = "TOOLRELAY_MAX_RECONNECT_ATTEMPTS", default_value_t = 5)]
    pub max_reconnect_attempts: u32,

    /// Seconds to wait for discovery to answer.
    #[arg(long, env = "TOOLRELAY_DISCOVERY_TIMEOUT_SECS", default_value_t = 30)]
    pub discovery_timeout_secs: u64,

    /// Seconds between SIGTERM and a forced kill.
    #[arg(long, env = "TOOLRELAY_TERMINATION_GRACE_SECS", default_value_t = 5)]
    pub termination_grace_secs: u64,
}

impl ServerConfig {
    /// Config with built-in defaults, ignoring flags and environment.
    pub fn with_defaults() -> Self {
        let supervisor = SupervisorSettings::default();
        let relay = RelaySettings::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: 9887,
            servers_file: None,
            agent_url: "http://127.0.0.1:8000".to_string(),
            allowed_origins: Vec::new(),
            idle_timeout_secs: relay.idle_timeout.as_secs(),
            max_reconnect_attempts: relay.max_reconnect_attempts,
            discovery_timeout_secs: supervisor.discovery_timeout.as_secs(),
            termination_grace_secs: supervisor.termination_grace.as_secs(),
        }
    }

    #[must_use]
    pub fn with_servers_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.servers_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_agent_url(mut self, url: impl Into<String>) -> Self {
        self.agent_url = url.into();
        self
    }

    #[must_use]
    pub fn with_allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.allowed_origins = origins;
        self
    }

    pub fn cors(&self) -> CorsConfig {
        if self.allowed_origins.is_empty() {
            CorsConfig::AllowAll
        } else {
            CorsConfig::AllowOrigins(self.allowed_origins.clone())
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings::default()
            .with_discovery_timeout(Duration::from_secs(self.discovery_timeout_secs))
            .with_termination_grace(Duration::from_secs(self.termination_grace_secs))
    }

    pub fn relay_settings(&self) -> RelaySettings {
        let defaults = RelaySettings::default();
        defaults
            .clone()
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_backoff(
                defaults.backoff_base,
                defaults.backoff_cap,
                self.max_reconnect_attempts,
            )
    }
}

/// Application context for the Axum adapter.
pub struct AxumContext {
    /// Control surface for tool servers.
    pub service: Arc<ToolServerService>,
    /// Streaming session relay.
    pub relay: Arc<SessionRelay>,
    /// SSE broadcaster for lifecycle events.
    pub sse: Arc<SseBroadcaster>,
    pub cors: CorsConfig,
}

impl AxumContext {
    /// Stop every session and every tool server.
    pub async fn shutdown(&self) {
        self.relay.shutdown();
        self.service.shutdown().await;
    }
}

/// Bootstrap all services, talking to the agent runtime over HTTP.
pub async fn bootstrap(config: &ServerConfig) -> Result<AxumContext> {
    let runtime = HttpAgentRuntime::new(config.agent_url.as_str())
        .context("failed to create agent runtime client")?;
    bootstrap_with_runtime(config, Arc::new(runtime)).await
}

/// Bootstrap with an explicit agent runtime.
pub async fn bootstrap_with_runtime(
    config: &ServerConfig,
    runtime: Arc<dyn AgentRuntime>,
) -> Result<AxumContext> {
    let supervisor_settings = config.supervisor_settings();
    let relay_settings = config.relay_settings();
    validate_settings(&supervisor_settings, &relay_settings).context("invalid settings")?;

    let registry = match &config.servers_file {
        Some(path) => InMemoryServerRegistry::from_json_file(path)
            .await
            .with_context(|| format!("failed to load servers file {}", path.display()))?,
        None => {
            warn!("No servers file configured; starting with an empty registry");
            InMemoryServerRegistry::new()
        }
    };

    let sse = Arc::new(SseBroadcaster::with_defaults());
    let emitter: Arc<dyn AppEventEmitter> = sse.clone();

    let service = Arc::new(ToolServerService::new(
        Arc::new(registry),
        supervisor_settings,
        emitter.clone(),
    ));

    let relay = Arc::new(
        SessionRelay::new(runtime, relay_settings, emitter).with_catalog(service.clone()),
    );

    info!(
        agent_url = %config.agent_url,
        servers_file = ?config.servers_file,
        "toolrelay bootstrapped"
    );

    Ok(AxumContext {
        service,
        relay,
        sse,
        cors: config.cors(),
    })
}

/// Initialise the global tracing subscriber.
///
/// Level comes from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
        .ok();
}

/// Start the web server and run until ctrl-c.
///
/// Auto-start servers are launched before the listener accepts requests.
/// On shutdown every session is cancelled and every tool server stopped.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let ctx = Arc::new(bootstrap(&config).await?);

    let started = ctx.service.start_auto().await;
    if !started.is_empty() {
        info!(count = started.len(), "Auto-start servers launched");
    }

    let app = crate::routes::create_router(ctx.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("toolrelay listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
