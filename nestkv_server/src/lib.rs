//! HTTP front end for a network back-end node, plus the matching client
//! transport.

pub mod client;
pub mod routes;
pub mod wire;

pub use client::HttpTransport;
pub use routes::{router, AppState};

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use nestkv_core::config::StoreConfig;
use nestkv_core::store::network::KvNode;

pub const DEFAULT_ADDR: &str = "127.0.0.1:7878";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub store: StoreConfig,
}

impl ServerConfig {
    /// Reads `NESTKV_ADDR` and the optional `NESTKV_CONFIG` JSON file.
    pub fn from_env() -> Result<Self> {
        let addr = std::env::var("NESTKV_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("Invalid NESTKV_ADDR '{}'", addr))?;
        let store = match std::env::var_os("NESTKV_CONFIG") {
            Some(path) => {
                let path = PathBuf::from(path);
                StoreConfig::from_path(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => StoreConfig::default(),
        };
        Ok(Self { addr, store })
    }
}

pub fn app(node: Arc<KvNode>, config: &StoreConfig) -> axum::Router {
    let state = AppState::new(node).with_latency(Duration::from_millis(config.network_latency_ms));
    router(state)
}

/// Serves a fresh node until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let node = Arc::new(KvNode::new());
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.addr))?;
    tracing::info!("nestkv node listening on {}", config.addr);
    axum::serve(listener, app(node, &config.store))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    tracing::info!("nestkv node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
