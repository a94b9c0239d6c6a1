use async_trait::async_trait;
use link_protocol::{
    APPLICATION_LOG_HEADER, ConfigStore, CsvLog, NETWORK_LOG_HEADER, Reading, STATUS_SUCCESS,
    StorageSection,
};
use tracing::{debug, warn};

use super::ReadingSink;
use crate::errors::LinkError;

/// Writes each reading to the two raw logs and merges the device state back
/// into the shared document.
#[derive(Debug, Clone)]
pub struct FileSink {
    network: CsvLog,
    application: CsvLog,
    store: ConfigStore,
}

impl FileSink {
    /// Log locations come from the document's `[storage]` section, resolved
    /// against the document's directory.
    pub fn new(store: ConfigStore, storage: &StorageSection) -> Self {
        let base = store.base_dir();
        Self {
            network: CsvLog::new(storage.network_log_path(&base), NETWORK_LOG_HEADER),
            application: CsvLog::new(storage.application_log_path(&base), APPLICATION_LOG_HEADER),
            store,
        }
    }

    /// network log: Timestamp,RSSI_Downlink,Status
    pub fn network_row(reading: &Reading) -> String {
        format!(
            "{},{:.2},{STATUS_SUCCESS}",
            reading.log_timestamp(),
            reading.rssi_downlink_dbm
        )
    }

    /// application log: Timestamp,Luminosity
    pub fn application_row(reading: &Reading) -> String {
        format!("{},{}", reading.log_timestamp(), reading.luminosity)
    }

    /// Attempt all three writes; return whatever failed.
    pub async fn persist(&self, reading: &Reading) -> Vec<LinkError> {
        let mut failures = Vec::new();

        if let Err(e) = self.network.append(&Self::network_row(reading)).await {
            failures.push(LinkError::transient("network log", e));
        }
        if let Err(e) = self.application.append(&Self::application_row(reading)).await {
            failures.push(LinkError::transient("application log", e));
        }
        if let Err(e) = self.store.merge_device_state(&reading.device_state()).await {
            failures.push(LinkError::transient("device state", e));
        }
        failures
    }
}

#[async_trait]
impl ReadingSink for FileSink {
    async fn record(&self, reading: &Reading) {
        let failures = self.persist(reading).await;
        if failures.is_empty() {
            debug!(luminosity = reading.luminosity, "reading persisted");
        }
        for err in failures {
            warn!(error = %err, "telemetry write dropped");
        }
    }
}
