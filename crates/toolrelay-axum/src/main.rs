//! `toolrelay` binary - the composition root.

use clap::Parser;
use toolrelay_axum::{ServerConfig, init_tracing, start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads the environment
    dotenvy::dotenv().ok();

    init_tracing();

    let config = ServerConfig::parse();
    start_server(config).await
}
