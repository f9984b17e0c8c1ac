//! WhatsApp bridge relay daemon
//!
//! Wires the relay core to its real collaborators: the gateway sidecar
//! holding the WhatsApp session, the Supabase media bucket and chat table,
//! and the HTTP/WebSocket surface the operator clients connect to.

mod config;
mod http;
mod persistence;
mod session;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use whatsapp_bridge_relay::{ChatRepository, Dispatcher, EventHub, IngestionPipeline, MediaStore};

use config::Config;
use http::AppState;
use persistence::SupabaseChatPersistence;
use session::GatewaySession;
use storage::SupabaseMediaStore;

#[derive(Debug, Parser)]
#[command(name = "whatsapp-bridge-daemon", about = "WhatsApp chat relay daemon")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the gateway endpoint
    #[arg(long)]
    gateway: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("load configuration")?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(gateway) = cli.gateway {
        config.gateway.endpoint = gateway;
    }

    let http_client = reqwest::Client::new();

    let store = Arc::new(SupabaseMediaStore::new(
        http_client.clone(),
        &config.supabase,
        &config.storage,
    ));
    // Storage being down must not keep the relay from starting; uploads
    // will fail per-message until it recovers.
    if let Err(e) = store.ensure_bucket().await {
        warn!("Media bucket initialization failed: {}", e);
    }
    let media: Arc<dyn MediaStore> = store;

    let persistence = Arc::new(SupabaseChatPersistence::new(
        http_client,
        &config.supabase,
        &config.persistence,
    ));
    let repo = Arc::new(ChatRepository::load(persistence).await);

    let hub = EventHub::default();

    // The one fatal startup error: no session, no relay.
    let (gateway, events) = GatewaySession::connect(
        &config.gateway.endpoint,
        Duration::from_secs(config.gateway.send_timeout_secs),
    )
    .await
    .with_context(|| format!("connect to WhatsApp gateway at {}", config.gateway.endpoint))?;

    let ingestion = IngestionPipeline::new(repo.clone(), media.clone(), hub.clone());
    tokio::spawn(ingestion.run(events));

    let dispatcher = Arc::new(Dispatcher::new(
        repo.clone(),
        media.clone(),
        gateway,
        hub.clone(),
    ));

    let state = AppState {
        repo,
        dispatcher,
        hub,
        media,
    };

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!("Relay listening on {}", addr);

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
}
