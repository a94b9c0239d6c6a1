pub mod readings;

use anyhow::Result;
use async_trait::async_trait;
use link_protocol::Reading;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

pub use readings::FileSink;

/// Where decoded readings go. Implementations swallow their own failures:
/// losing telemetry must never stop the link.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn record(&self, reading: &Reading);
}

/// Console logging, plus a daily-rolling file when `--log-dir` is set. Keep
/// the returned guard alive for the life of the process.
pub fn init_tracing(cfg: &Config) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::from_default_env()
        .add_directive("base_station=info".parse()?)
        .add_directive("link_protocol=info".parse()?)
        .add_directive("tokio=warn".parse()?);

    match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "base_station.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).compact().init();
            Ok(None)
        }
    }
}
