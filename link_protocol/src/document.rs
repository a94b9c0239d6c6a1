//! The shared TOML document.
//!
//! Several processes read and rewrite this file: the base station (link
//! settings in, device state out), the statistics aggregator and the
//! dashboard. Writers replace it atomically through a temp file in the same
//! directory followed by a rename, so readers only ever see a complete
//! document. There is no locking; concurrent writers race and the last
//! rename wins.

use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::DEFAULT_SENSOR_PORT;
use crate::reading::DeviceState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a valid document: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("cannot serialize document: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("atomic replace of {} failed: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ============================== Sections ====================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConfig {
    pub link: LinkSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub statistics: StatisticsSection,
    #[serde(default)]
    pub device: DeviceSection,
}

/// Sensor node addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSection {
    pub target_address: IpAddr,
    #[serde(default = "default_port")]
    pub target_port: u16,
    /// Local UDP port; the node answers on the port it was addressed on, so
    /// this follows `target_port` unless set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub enabled: bool,
    pub poll_interval_seconds: f64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Relative paths are resolved against the document's directory.
    pub log_dir: PathBuf,
    pub network_log: String,
    pub application_log: String,
    pub network_stats: String,
    pub application_stats: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("data"),
            network_log: "raw_network.csv".into(),
            application_log: "raw_application.csv".into(),
            network_stats: "network_stats.csv".into(),
            application_stats: "application_stats.csv".into(),
        }
    }
}

impl StorageSection {
    pub fn dir(&self, base: &Path) -> PathBuf {
        if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            base.join(&self.log_dir)
        }
    }

    pub fn network_log_path(&self, base: &Path) -> PathBuf {
        self.dir(base).join(&self.network_log)
    }

    pub fn application_log_path(&self, base: &Path) -> PathBuf {
        self.dir(base).join(&self.application_log)
    }

    pub fn network_stats_path(&self, base: &Path) -> PathBuf {
        self.dir(base).join(&self.network_stats)
    }

    pub fn application_stats_path(&self, base: &Path) -> PathBuf {
        self.dir(base).join(&self.application_stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsSection {
    pub enabled: bool,
    pub network_window: usize,
    pub application_window: usize,
    pub interval_seconds: f64,
}

impl Default for StatisticsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            network_window: 10,
            application_window: 10,
            interval_seconds: 10.0,
        }
    }
}

/// Thresholds (written by the dashboard) and device state (written by the
/// base station).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    #[serde(deserialize_with = "whole_number")]
    pub attention_threshold: i64,
    #[serde(deserialize_with = "whole_number")]
    pub critical_threshold: i64,
    pub led_green: bool,
    pub led_yellow: bool,
    pub led_red: bool,
    pub buzzer: bool,
    pub current_luminosity: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

/// Integer field that also accepts a float (`600.0`), truncated toward zero.
fn whole_number<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
    }
    Ok(match Number::deserialize(de)? {
        Number::Int(v) => v,
        // saturating; NaN becomes 0
        Number::Float(v) => v as i64,
    })
}

fn default_port() -> u16 {
    DEFAULT_SENSOR_PORT
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

// ============================ Engine view ===================================

/// What the link engine needs out of the document on each tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    pub target: SocketAddr,
    pub local_port: u16,
    pub enabled: bool,
    pub poll_interval: Duration,
    pub attention_threshold: u16,
    pub critical_threshold: u16,
}

impl SharedConfig {
    pub fn link_config(&self) -> LinkConfig {
        let poll_interval = Duration::try_from_secs_f64(self.engine.poll_interval_seconds)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        LinkConfig {
            target: SocketAddr::new(self.link.target_address, self.link.target_port),
            local_port: self.link.local_port.unwrap_or(self.link.target_port),
            enabled: self.engine.enabled,
            poll_interval,
            attention_threshold: clamp_threshold(self.device.attention_threshold),
            critical_threshold: clamp_threshold(self.device.critical_threshold),
        }
    }
}

/// Thresholds travel as u16 on the wire.
fn clamp_threshold(value: i64) -> u16 {
    value.clamp(0, i64::from(u16::MAX)) as u16
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            link: LinkSection {
                target_address: IpAddr::V4(Ipv4Addr::new(192, 168, 4, 1)),
                target_port: DEFAULT_SENSOR_PORT,
                local_port: None,
            },
            engine: EngineSection::default(),
            storage: StorageSection::default(),
            statistics: StatisticsSection::default(),
            device: DeviceSection::default(),
        }
    }
}

// ============================== Store =======================================

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the document; relative storage paths hang off it.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub async fn load(&self) -> Result<SharedConfig, StoreError> {
        let text = self.read().await?;
        toml::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Read-modify-write of the raw document. Keys this process does not know
    /// about are carried through untouched.
    pub async fn update<F>(&self, edit: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut toml::Table),
    {
        let text = self.read().await?;
        let mut table: toml::Table = toml::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        edit(&mut table);
        let out = toml::to_string(&table)?;
        write_atomic(&self.path, out.into_bytes()).await
    }

    /// Merge fresh device state into the `[device]` section.
    pub async fn merge_device_state(&self, state: &DeviceState) -> Result<(), StoreError> {
        self.update(|doc| {
            let device = doc
                .entry("device")
                .or_insert(toml::Value::Table(toml::Table::new()));
            if !device.is_table() {
                *device = toml::Value::Table(toml::Table::new());
            }
            if let toml::Value::Table(device) = device {
                state.merge_into(device);
            }
        })
        .await
    }

    /// Replace the whole document with a typed config.
    pub async fn save(&self, config: &SharedConfig) -> Result<(), StoreError> {
        let out = toml::to_string(config)?;
        write_atomic(&self.path, out.into_bytes()).await
    }

    async fn read(&self) -> Result<String, StoreError> {
        fs::read_to_string(&self.path)
            .await
            .map_err(|source| StoreError::Read {
                path: self.path.clone(),
                source,
            })
    }
}

/// Write `contents` to a temp file next to `path`, then rename it over
/// `path`.
pub async fn write_atomic(path: &Path, contents: Vec<u8>) -> Result<(), StoreError> {
    let target = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || replace_file(&target, &contents))
        .await
        .unwrap_or_else(|join| Err(io::Error::other(join)));
    result.map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
