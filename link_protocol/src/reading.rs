use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::frame::UplinkFields;

pub type Timestamp = DateTime<Local>;

/// Timestamp layout of the raw log rows (millisecond precision).
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
/// Timestamp layout of `device.last_update` in the shared document.
pub const STATE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One decoded uplink frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: Timestamp,
    pub rssi_downlink_dbm: f64,
    pub luminosity: u16,
    pub led_green: bool,
    pub led_yellow: bool,
    pub led_red: bool,
    pub buzzer: bool,
}

impl Reading {
    pub fn from_uplink(fields: &UplinkFields, timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            rssi_downlink_dbm: fields.rssi_dbm(),
            luminosity: fields.luminosity,
            led_green: fields.led_green,
            led_yellow: fields.led_yellow,
            led_red: fields.led_red,
            buzzer: fields.buzzer,
        }
    }

    pub fn log_timestamp(&self) -> String {
        self.timestamp.format(LOG_TIMESTAMP_FORMAT).to_string()
    }

    pub fn device_state(&self) -> DeviceState {
        DeviceState {
            led_green: self.led_green,
            led_yellow: self.led_yellow,
            led_red: self.led_red,
            buzzer: self.buzzer,
            current_luminosity: self.luminosity,
            last_update: self.timestamp.format(STATE_TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Device-state fields the base station republishes into the `[device]`
/// section of the shared document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub led_green: bool,
    pub led_yellow: bool,
    pub led_red: bool,
    pub buzzer: bool,
    pub current_luminosity: u16,
    pub last_update: String,
}

impl DeviceState {
    /// Overwrite the device-state keys of a `[device]` table, leaving every
    /// other key (thresholds, dashboard extras) as found.
    pub fn merge_into(&self, device: &mut toml::Table) {
        use toml::Value;
        device.insert("led_green".into(), Value::Boolean(self.led_green));
        device.insert("led_yellow".into(), Value::Boolean(self.led_yellow));
        device.insert("led_red".into(), Value::Boolean(self.led_red));
        device.insert("buzzer".into(), Value::Boolean(self.buzzer));
        device.insert(
            "current_luminosity".into(),
            Value::Integer(i64::from(self.current_luminosity)),
        );
        device.insert("last_update".into(), Value::String(self.last_update.clone()));
    }
}
