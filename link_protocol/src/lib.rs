// lib.rs — Shared sensor-link protocol: wire frames, readings, shared document

pub mod csv_log;
pub mod document;
pub mod frame;
pub mod reading;

pub use csv_log::CsvLog;
pub use document::{ConfigStore, LinkConfig, SharedConfig, StorageSection, StoreError};
pub use frame::{
    FRAME_LEN, FrameError, SequenceCounter, UplinkFields, decode_uplink, downlink_sequence,
    downlink_thresholds, encode_downlink, encode_uplink, rssi_dbm,
};
pub use reading::{DeviceState, Reading, Timestamp};

// =============================== Common =====================================

pub const DEFAULT_SENSOR_PORT: u16 = 8888;

/// Status column value for a decoded uplink in the network log.
pub const STATUS_SUCCESS: &str = "Success";

pub const NETWORK_LOG_HEADER: &str = "Timestamp,RSSI_Downlink,Status";
pub const APPLICATION_LOG_HEADER: &str = "Timestamp,Luminosity";
pub const NETWORK_STATS_HEADER: &str =
    "Timestamp,RSSI_Downlink_Mean,RSSI_Downlink_Min,RSSI_Downlink_Max";
pub const APPLICATION_STATS_HEADER: &str =
    "Timestamp,Luminosity_Mean,Luminosity_Min,Luminosity_Max";
