use std::io;
use std::path::PathBuf;

use link_protocol::{
    APPLICATION_LOG_HEADER, APPLICATION_STATS_HEADER, ConfigStore, CsvLog, NETWORK_LOG_HEADER,
    NETWORK_STATS_HEADER, SharedConfig,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::window::{Summary, luminosity_window, rssi_window};

/// Extra raw rows read beyond the window, so filtered-out rows do not starve it.
const TAIL_MULTIPLIER: usize = 3;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("reading {}: {source}", path.display())]
    Read { path: PathBuf, #[source] source: io::Error },
    #[error("writing {}: {source}", path.display())]
    Write { path: PathBuf, #[source] source: io::Error },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Written(Summary),
    /// Raw log exists but nothing usable in the window.
    NoData,
    /// Raw log not created yet.
    MissingLog,
}

#[derive(Debug)]
pub struct Report {
    pub network: Result<Outcome, StatsError>,
    pub application: Result<Outcome, StatsError>,
}

impl Report {
    pub fn log(&self) {
        for (name, res) in [("network", &self.network), ("application", &self.application)] {
            match res {
                Ok(Outcome::Written(s)) => info!(log = name, mean = s.mean, min = s.min, max = s.max, "statistics saved"),
                Ok(Outcome::NoData) => info!(log = name, "no rows in window"),
                Ok(Outcome::MissingLog) => info!(log = name, "raw log does not exist yet"),
                Err(e) => warn!(log = name, error = %e, "statistics run failed"),
            }
        }
    }
}

async fn summarize(
    raw: &CsvLog,
    out: &CsvLog,
    window: usize,
    select: fn(&[String], usize) -> Vec<f64>,
    stamp: &str,
) -> Result<Outcome, StatsError> {
    let rows = match raw.tail(window.max(1) * TAIL_MULTIPLIER).await {
        Ok(rows) => rows,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Outcome::MissingLog),
        Err(source) => return Err(StatsError::Read { path: raw.path().to_path_buf(), source }),
    };
    let Some(summary) = Summary::of(&select(&rows, window)) else {
        return Ok(Outcome::NoData);
    };
    out.append(&summary.row(stamp))
        .await
        .map_err(|source| StatsError::Write { path: out.path().to_path_buf(), source })?;
    Ok(Outcome::Written(summary))
}

/// One analysis pass over both raw logs, appending one row per stats file.
pub async fn run_once(store: &ConfigStore, doc: &SharedConfig, stamp: &str) -> Report {
    let base = store.base_dir();
    let storage = &doc.storage;
    let stats = &doc.statistics;

    let net_raw = CsvLog::new(storage.network_log_path(&base), NETWORK_LOG_HEADER);
    let net_out = CsvLog::new(storage.network_stats_path(&base), NETWORK_STATS_HEADER);
    let app_raw = CsvLog::new(storage.application_log_path(&base), APPLICATION_LOG_HEADER);
    let app_out = CsvLog::new(storage.application_stats_path(&base), APPLICATION_STATS_HEADER);

    Report {
        network: summarize(&net_raw, &net_out, stats.network_window, rssi_window, stamp).await,
        application: summarize(&app_raw, &app_out, stats.application_window, luminosity_window, stamp).await,
    }
}
