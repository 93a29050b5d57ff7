//! ferryd: Ferry receiving daemon.
//!
//! Usage: `ferryd [config.toml]`. Without an argument the config is
//! resolved from `$FERRY_CONFIG` or the XDG config directory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;
use ferry_transfer::transport::Acceptor;
use ferry_transfer::{sink, TransferListener, TransferRegistry};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config(std::env::args().nth(1).map(PathBuf::from))?;
    config.validate_server().context("invalid server configuration")?;

    let sink = sink::from_config(&config.storage).context("failed to open storage sink")?;
    tracing::info!(
        sink = ?config.storage.sink,
        path = %config.storage.path.display(),
        "storage ready"
    );
    let registry = Arc::new(TransferRegistry::new(config.server.my_id.clone(), sink));
    let acceptor = Acceptor::from_config(&config).context("failed to set up secure channel")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let addr = config.listen_addr();
    let listener = TransferListener::bind(&addr, acceptor, registry.clone(), shutdown_tx.subscribe())
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let listener_task = tokio::spawn(listener.run());

    let completion_printer = {
        let mut completed = registry.subscribe();
        let my_id = config.server.my_id.clone();
        tokio::spawn(async move {
            while completed.changed().await.is_ok() {
                let count = *completed.borrow_and_update();
                tracing::info!(my_id = %my_id, count, "transfers completed");
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()   => tracing::info!("shutting down"),
        r = listener_task        => tracing::error!("listener exited: {:?}", r),
        r = completion_printer   => tracing::error!("completion printer exited: {:?}", r),
    }

    tracing::info!(completed = registry.completed(), "ferryd stopped");
    Ok(())
}

/// An explicit path must exist and parse. Otherwise env → file → defaults,
/// and a broken implicit config falls back to defaults with a warning.
fn load_config(path: Option<PathBuf>) -> Result<FerryConfig> {
    if let Some(path) = path {
        if !path.exists() {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        return FerryConfig::load_file(&path)
            .with_context(|| format!("failed to load {}", path.display()));
    }

    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    Ok(FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    }))
}
