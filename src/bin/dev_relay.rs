//! Development relay binary
//!
//! Runs the in-crate relay so the chat client can be tried locally:
//! `RELAY_BIND=127.0.0.1:3000 cargo run --bin dev-relay`

use socket_chat::config::Config;
use socket_chat::relay::RelayServer;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let listener = tokio::net::TcpListener::bind(&config.relay_bind).await?;

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    Arc::new(RelayServer::new())
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down relay...");
        })
        .await?;

    info!("Relay shutdown complete");
    Ok(())
}
