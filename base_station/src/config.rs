//Command line interface
// runtime configuration (document path, bind host, tick timings)
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;

use crate::link::LinkTiming;

#[derive(Debug, Clone)]
pub struct Config {
    pub document: PathBuf,
    pub bind_host: IpAddr,
    pub timing: LinkTiming,
    pub log_dir: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "UDP base station for the luminosity sensor node")]
pub struct Cli {
    /// Shared settings document (TOML), also read by the dashboard and the
    /// statistics aggregator.
    #[arg(long, default_value = "settings.toml")] pub config: PathBuf,
    #[arg(long, default_value = "0.0.0.0")]       pub bind_host: IpAddr,
    /// Upper bound on the wait for an uplink frame in one tick.
    #[arg(long, default_value_t = 1000)]          pub recv_timeout_ms: u64,
    /// Backoff while the link is disabled or the document is unreadable.
    #[arg(long, default_value_t = 5)]             pub idle_backoff_secs: u64,
    /// Pause at the end of every active tick.
    #[arg(long, default_value_t = 50)]            pub yield_ms: u64,
    /// Also write the process log to a daily-rolling file in this directory.
    #[arg(long)]                                  pub log_dir: Option<PathBuf>,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        <Cli as Parser>::parse().build()
    }

    fn build(self) -> Result<Config> {
        if self.recv_timeout_ms == 0 { bail!("--recv-timeout-ms must be > 0"); }
        Ok(Config {
            document: self.config,
            bind_host: self.bind_host,
            timing: LinkTiming {
                recv_timeout: Duration::from_millis(self.recv_timeout_ms),
                idle_backoff: Duration::from_secs(self.idle_backoff_secs),
                yield_slice: Duration::from_millis(self.yield_ms),
            },
            log_dir: self.log_dir,
        })
    }
}
