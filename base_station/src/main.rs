// src/main.rs
mod config;
mod errors;
mod link;
mod logging;
mod net;

use anyhow::{Context, Result};
use link_protocol::ConfigStore;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::link::LinkEngine;
use crate::logging::FileSink;
use crate::net::udp::UdpBinder;

#[tokio::main]
async fn main() -> Result<()> {
    // -------- config + logging ----------
    let cfg = config::Cli::parse_and_build_config()?;
    let _log_guard = logging::init_tracing(&cfg)?;
    info!(?cfg, "base station starting");

    // -------- shared document + sink ----------
    let store = ConfigStore::new(&cfg.document);
    let doc = store
        .load()
        .await
        .with_context(|| format!("loading {}", cfg.document.display()))?;
    let sink = FileSink::new(store.clone(), &doc.storage);

    // -------- link engine ----------
    // Bind failure here is fatal; later rebinds are retried by the engine.
    let (stop_tx, stop_rx) = watch::channel(false);
    let engine = LinkEngine::start(store, UdpBinder::new(cfg.bind_host), sink, cfg.timing, stop_rx)
        .await
        .context("link engine failed to start")?;
    let engine = tokio::spawn(engine.run());

    info!("base station running. Press Ctrl+C to stop…");

    // -------- graceful shutdown ----------
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received; closing link");
            let _ = stop_tx.send(true);
        }
        Err(e) => warn!(?e, "failed to install Ctrl+C handler; running until killed"),
    }
    engine.await.context("link engine task")?;
    info!("socket closed; exiting.");
    Ok(())
}
