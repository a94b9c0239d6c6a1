//! Fixed 52-byte wire format shared by both link directions.
//!
//! ```text
//! downlink (base station -> node)      uplink (node -> base station)
//!   [8]      marker, always 1            [2]      raw signal strength
//!   [10]     marker, always 0            [17..19] luminosity, u16 BE
//!   [12]     sequence counter            [34]     green LED
//!   [16..18] attention threshold, BE     [37]     yellow LED
//!   [18..20] critical threshold, BE      [40]     red LED
//!                                        [43]     buzzer
//! ```
//!
//! Every other byte is zero on encode and ignored on decode. There is no
//! checksum, magic or version field: any datagram of the right length is
//! accepted as telemetry.

use thiserror::Error;

pub const FRAME_LEN: usize = 52;

const DL_MARKER_HI: usize = 8;
const DL_MARKER_LO: usize = 10;
const DL_SEQUENCE: usize = 12;
const DL_ATTENTION: usize = 16;
const DL_CRITICAL: usize = 18;

const UL_SIGNAL: usize = 2;
const UL_LUMINOSITY: usize = 17;
const UL_LED_GREEN: usize = 34;
const UL_LED_YELLOW: usize = 37;
const UL_LED_RED: usize = 40;
const UL_BUZZER: usize = 43;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed frame: expected {FRAME_LEN} bytes, got {0}")]
    Malformed(usize),
}

fn check_len(buf: &[u8]) -> Result<&[u8; FRAME_LEN], FrameError> {
    buf.try_into().map_err(|_| FrameError::Malformed(buf.len()))
}

fn put_u16(buf: &mut [u8; FRAME_LEN], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn get_u16(buf: &[u8; FRAME_LEN], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

// ============================== Downlink ====================================

/// Build a command frame for the sensor node.
pub fn encode_downlink(sequence: u8, attention_threshold: u16, critical_threshold: u16) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[DL_MARKER_HI] = 1;
    buf[DL_MARKER_LO] = 0;
    buf[DL_SEQUENCE] = sequence;
    put_u16(&mut buf, DL_ATTENTION, attention_threshold);
    put_u16(&mut buf, DL_CRITICAL, critical_threshold);
    buf
}

pub fn downlink_sequence(buf: &[u8]) -> Result<u8, FrameError> {
    Ok(check_len(buf)?[DL_SEQUENCE])
}

/// (attention, critical) as carried by a downlink frame.
pub fn downlink_thresholds(buf: &[u8]) -> Result<(u16, u16), FrameError> {
    let buf = check_len(buf)?;
    Ok((get_u16(buf, DL_ATTENTION), get_u16(buf, DL_CRITICAL)))
}

/// Downlink sequence counter, wraps modulo 256.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    last: u8,
}

impl SequenceCounter {
    /// Counter whose next `advance` yields `next`.
    pub fn starting_at(next: u8) -> Self {
        Self { last: next.wrapping_sub(1) }
    }

    pub fn last(&self) -> u8 {
        self.last
    }

    /// Value the next `advance` will return.
    pub fn peek(&self) -> u8 {
        self.last.wrapping_add(1)
    }

    /// Step once and return the value to put on the wire.
    pub fn advance(&mut self) -> u8 {
        self.last = self.last.wrapping_add(1);
        self.last
    }
}

// =============================== Uplink =====================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UplinkFields {
    pub signal_raw: u8,
    pub luminosity: u16,
    pub led_green: bool,
    pub led_yellow: bool,
    pub led_red: bool,
    pub buzzer: bool,
}

impl UplinkFields {
    pub fn rssi_dbm(&self) -> f64 {
        rssi_dbm(self.signal_raw)
    }
}

/// Decode a telemetry frame. Anything that is not exactly 52 bytes is
/// rejected without looking at its contents.
pub fn decode_uplink(buf: &[u8]) -> Result<UplinkFields, FrameError> {
    let buf = check_len(buf)?;
    Ok(UplinkFields {
        signal_raw: buf[UL_SIGNAL],
        luminosity: get_u16(buf, UL_LUMINOSITY),
        led_green: buf[UL_LED_GREEN] != 0,
        led_yellow: buf[UL_LED_YELLOW] != 0,
        led_red: buf[UL_LED_RED] != 0,
        buzzer: buf[UL_BUZZER] != 0,
    })
}

/// Node-side encoder, used by simulators and tests.
pub fn encode_uplink(fields: &UplinkFields) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    buf[UL_SIGNAL] = fields.signal_raw;
    put_u16(&mut buf, UL_LUMINOSITY, fields.luminosity);
    buf[UL_LED_GREEN] = fields.led_green as u8;
    buf[UL_LED_YELLOW] = fields.led_yellow as u8;
    buf[UL_LED_RED] = fields.led_red as u8;
    buf[UL_BUZZER] = fields.buzzer as u8;
    buf
}

/// Map the radio's raw signal byte to dBm. Values above 128 are the
/// two's-complement negatives.
pub fn rssi_dbm(raw: u8) -> f64 {
    let raw = f64::from(raw);
    if raw > 128.0 {
        ((raw - 256.0) / 2.0) - 74.0
    } else {
        (raw / 2.0) - 74.0
    }
}

// ================================ Tests =====================================
