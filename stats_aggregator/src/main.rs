// src/main.rs
mod report;
mod window;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use link_protocol::ConfigStore;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Stats rows use day-first timestamps, unlike the raw logs.
const STATS_TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";
const FALLBACK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Parser, Debug, Clone)]
#[command(about = "Periodic mean/min/max summaries of the base station's raw logs")]
struct Cli {
    /// Shared settings document (TOML).
    #[arg(long, default_value = "settings.toml")] config: PathBuf,
    /// Wait while statistics are disabled or the document is unreadable.
    #[arg(long, default_value_t = 5)]             idle_backoff_secs: u64,
}

fn interval_from(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(FALLBACK_INTERVAL)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("stats_aggregator=info".parse()?)
        .add_directive("link_protocol=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let cli = Cli::parse();
    let store = ConfigStore::new(&cli.config);
    let idle = Duration::from_secs(cli.idle_backoff_secs);
    info!(document = %cli.config.display(), "statistics aggregator starting");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let wait = match store.load().await {
            Ok(doc) if doc.statistics.enabled => {
                let stamp = Local::now().format(STATS_TIMESTAMP_FORMAT).to_string();
                report::run_once(&store, &doc, &stamp).await.log();
                interval_from(doc.statistics.interval_seconds)
            }
            Ok(_) => {
                debug!("statistics disabled");
                idle
            }
            Err(e) => {
                warn!(error = %e, "settings unavailable; backing off");
                idle
            }
        };

        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(?e, "failed to listen for Ctrl+C");
                }
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }

    info!("statistics aggregator stopped");
    Ok(())
}
