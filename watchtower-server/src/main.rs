//! Watchtower daemon.
//!
//! Runs the monitor scheduler in the background and exposes a REST control
//! API for watches, one-shot lookups, endpoint management, and stats.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;

use watchtower_core::{AlertSink, EventStore, LogSink, SqliteStore};
use watchtower_types::models::AppConfig;

mod api;
mod cli;
mod notify;
mod state;

use cli::Cli;
use notify::WebhookSink;
use state::AppState;

/// Check history older than this is pruned.
const RETENTION_DAYS: u32 = 30;
/// How often endpoint stats are flushed to the store.
const PERSIST_INTERVAL: Duration = Duration::from_secs(900);
/// How often old check history is pruned.
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let store: Arc<dyn EventStore> = if cli.ephemeral {
        tracing::warn!("ephemeral mode: nothing will be persisted");
        Arc::new(SqliteStore::open_in_memory().context("in-memory store init failed")?)
    } else {
        tracing::info!(db = %cli.db.display(), "opening event store");
        Arc::new(SqliteStore::open(&cli.db).context("event store init failed")?)
    };

    // The owner is always on the roster.
    if config.owner_id != 0 {
        store.add_user(config.owner_id).await?;
    }

    let sink: Arc<dyn AlertSink> = if config.webhook_url.is_empty() {
        tracing::info!("no webhook configured, alerts go to the log");
        Arc::new(LogSink)
    } else {
        tracing::info!(url = %config.webhook_url, "webhook alert sink enabled");
        Arc::new(WebhookSink::new(config.webhook_url.clone()))
    };

    let state = AppState::new(config, store, sink)?;

    match state.restore_endpoint_stats().await {
        Ok(n) if n > 0 => tracing::info!(endpoints = n, "restored endpoint stats"),
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "could not restore endpoint stats"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task =
        tokio::spawn(Arc::clone(state.scheduler()).run(shutdown_rx.clone()));
    let maintenance_task = tokio::spawn(maintenance_loop(state.clone(), shutdown_rx));

    let app = Router::new()
        .nest("/api", api::router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "control API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;
    maintenance_task.abort();

    if let Err(err) = state.persist_endpoint_stats().await {
        tracing::warn!(error = %err, "final endpoint stats flush failed");
    }
    tracing::info!("shutdown complete");
    Ok(())
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    match std::fs::read_to_string(&cli.config) {
        Ok(raw) => {
            let config: AppConfig = serde_json::from_str(&raw)
                .with_context(|| format!("bad config file {}", cli.config.display()))?;
            tracing::info!(
                path = %cli.config.display(),
                mirrors = config.api.mirror_urls.len(),
                proxies = config.proxies.len(),
                "configuration loaded"
            );
            Ok(config)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                path = %cli.config.display(),
                "config file missing, using defaults"
            );
            Ok(AppConfig::default())
        }
        Err(err) => Err(err).context(format!("cannot read {}", cli.config.display())),
    }
}

/// Periodic persistence and retention housekeeping.
async fn maintenance_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut persist = tokio::time::interval(PERSIST_INTERVAL);
    let mut prune = tokio::time::interval(PRUNE_INTERVAL);
    // The immediate first tick of each interval is uninteresting.
    persist.tick().await;
    prune.tick().await;

    loop {
        tokio::select! {
            _ = persist.tick() => {
                if let Err(err) = state.persist_endpoint_stats().await {
                    tracing::warn!(error = %err, "endpoint stats flush failed");
                }
            }
            _ = prune.tick() => {
                match state.store().prune_checks(RETENTION_DAYS).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "pruned old check history"),
                    Err(err) => tracing::warn!(error = %err, "check pruning failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
