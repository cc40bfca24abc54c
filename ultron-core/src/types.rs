//! Shared types, error enum, and decoded message types for ultron-core.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adif::AdifRecord;

/// All errors produced by ultron-core.
#[derive(Debug, Error)]
pub enum UltronError {
    #[error("malformed packet at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("reference table error: {0}")]
    Table(String),
}

pub type Result<T> = std::result::Result<T, UltronError>;

// ---------------------------------------------------------------------------
// DXCC identifiers
// ---------------------------------------------------------------------------

/// Numeric DXCC entity code (e.g. 291 = United States).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DxccId(pub u32);

impl fmt::Display for DxccId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DxccId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse().map(DxccId)
    }
}

// ---------------------------------------------------------------------------
// Band plan
// ---------------------------------------------------------------------------

/// Amateur HF/6m bands the controller knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    #[serde(rename = "160m")]
    M160,
    #[serde(rename = "80m")]
    M80,
    #[serde(rename = "60m")]
    M60,
    #[serde(rename = "40m")]
    M40,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "20m")]
    M20,
    #[serde(rename = "17m")]
    M17,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "12m")]
    M12,
    #[serde(rename = "10m")]
    M10,
    #[serde(rename = "6m")]
    M6,
}

/// Band edges in Hz, lower bound inclusive, upper bound exclusive.
pub const BAND_PLAN: &[(Band, u64, u64)] = &[
    (Band::M160, 1_800_000, 2_000_000),
    (Band::M80, 3_500_000, 4_000_000),
    (Band::M60, 5_300_000, 5_400_000),
    (Band::M40, 7_000_000, 7_300_000),
    (Band::M30, 10_100_000, 10_150_000),
    (Band::M20, 14_000_000, 14_350_000),
    (Band::M17, 18_068_000, 18_168_000),
    (Band::M15, 21_000_000, 21_450_000),
    (Band::M12, 24_890_000, 24_990_000),
    (Band::M10, 28_000_000, 29_700_000),
    (Band::M6, 50_000_000, 54_000_000),
];

impl Band {
    pub const ALL: [Band; 11] = [
        Band::M160,
        Band::M80,
        Band::M60,
        Band::M40,
        Band::M30,
        Band::M20,
        Band::M17,
        Band::M15,
        Band::M12,
        Band::M10,
        Band::M6,
    ];

    /// Map a dial frequency to its band. `None` outside the plan.
    pub fn from_frequency(hz: u64) -> Option<Band> {
        BAND_PLAN
            .iter()
            .find(|(_, lo, hi)| hz >= *lo && hz < *hi)
            .map(|(band, _, _)| *band)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::M160 => "160m",
            Band::M80 => "80m",
            Band::M60 => "60m",
            Band::M40 => "40m",
            Band::M30 => "30m",
            Band::M20 => "20m",
            Band::M17 => "17m",
            Band::M15 => "15m",
            Band::M12 => "12m",
            Band::M10 => "10m",
            Band::M6 => "6m",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Band {
    type Err = UltronError;

    /// Case-insensitive, e.g. "20m" or "20M".
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Band::ALL
            .iter()
            .find(|b| b.as_str() == wanted)
            .copied()
            .ok_or_else(|| UltronError::Config(format!("unknown band: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Mode symbols
// ---------------------------------------------------------------------------

/// Single-character mode codes used in Decode messages.
pub const MODE_SYMBOLS: &[(&str, &str)] = &[
    ("`", "FST4"),
    ("+", "FT4"),
    ("~", "FT8"),
    ("$", "JT4"),
    ("@", "JT9"),
    ("#", "JT65"),
    (":", "Q65"),
    ("&", "MSK144"),
];

/// Human-readable mode name for a decode's mode field.
/// Unknown symbols are returned trimmed and unchanged.
pub fn mode_name(symbol: &str) -> &str {
    let symbol = symbol.trim();
    MODE_SYMBOLS
        .iter()
        .find(|(s, _)| *s == symbol)
        .map(|(_, name)| *name)
        .unwrap_or(symbol)
}

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// Type 0: periodic liveness tick from the radio software.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub id: String,
    pub max_schema: u32,
    pub version: String,
    pub revision: String,
}

/// Type 1: radio software state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub id: String,
    pub dial_frequency_hz: u64,
    pub mode: String,
    pub dx_call: Option<String>,
    pub report: String,
    pub tx_mode: String,
    pub tx_enabled: bool,
    pub transmitting: bool,
    pub decoding: bool,
    pub rx_df: i32,
    pub tx_df: i32,
    pub de_call: String,
    pub de_grid: String,
    pub dx_grid: Option<String>,
    pub tx_watchdog: bool,
}

impl Status {
    pub fn band(&self) -> Option<Band> {
        Band::from_frequency(self.dial_frequency_hz)
    }
}

/// Type 2: one over-the-air decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decode {
    pub id: String,
    pub is_new: bool,
    /// Milliseconds since UTC midnight.
    pub time_ms: u32,
    pub snr_db: i32,
    pub delta_time_s: f64,
    pub delta_frequency_hz: i32,
    pub mode: String,
    pub message: String,
    pub low_confidence: bool,
    pub off_air: bool,
}

impl Decode {
    /// `HHMMSS` rendering of the decode time.
    pub fn time_hhmmss(&self) -> String {
        let secs = self.time_ms / 1000;
        format!(
            "{:02}{:02}{:02}",
            (secs / 3600) % 24,
            (secs / 60) % 60,
            secs % 60
        )
    }
}

/// Type 4: ask the radio software to answer a decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub id: String,
    pub time_ms: u32,
    pub snr_db: i32,
    pub delta_time_s: f64,
    pub delta_frequency_hz: i32,
    pub mode: String,
    pub message: String,
    pub low_confidence: bool,
    pub modifiers: u8,
}

impl Reply {
    /// Re-pack the fields of the decode being answered.
    pub fn from_decode(decode: &Decode) -> Self {
        Reply {
            id: decode.id.clone(),
            time_ms: decode.time_ms,
            snr_db: decode.snr_db,
            delta_time_s: decode.delta_time_s,
            delta_frequency_hz: decode.delta_frequency_hz,
            mode: decode.mode.clone(),
            message: decode.message.clone(),
            low_confidence: decode.low_confidence,
            modifiers: u8::from(decode.off_air),
        }
    }
}

/// Type 8: stop transmitting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HaltTx {
    pub id: String,
    pub auto_tx_only: bool,
}

impl HaltTx {
    pub fn new(id: &str) -> Self {
        HaltTx {
            id: id.to_string(),
            auto_tx_only: false,
        }
    }
}

/// Type 12: a contact the radio software just logged, as a field-tagged record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedAdif {
    pub id: String,
    pub record: AdifRecord,
}

/// Union type for all decoded datagrams.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Message {
    Heartbeat(Heartbeat),
    Status(Status),
    Decode(Decode),
    Reply(Reply),
    HaltTx(HaltTx),
    LoggedAdif(LoggedAdif),
    Unrecognized { kind: u32 },
}

impl Message {
    /// Software id carried by the message, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            Message::Heartbeat(m) => Some(&m.id),
            Message::Status(m) => Some(&m.id),
            Message::Decode(m) => Some(&m.id),
            Message::Reply(m) => Some(&m.id),
            Message::HaltTx(m) => Some(&m.id),
            Message::LoggedAdif(m) => Some(&m.id),
            Message::Unrecognized { .. } => None,
        }
    }

    /// Short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Message::Heartbeat(_) => "heartbeat",
            Message::Status(_) => "status",
            Message::Decode(_) => "decode",
            Message::Reply(_) => "reply",
            Message::HaltTx(_) => "halt_tx",
            Message::LoggedAdif(_) => "logged_adif",
            Message::Unrecognized { .. } => "unrecognized",
        }
    }
}

/// A decode enriched with the radio state current when it arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeEvent {
    /// Milliseconds since UTC midnight, as reported by the radio software.
    pub time_ms: u32,
    pub snr_db: i32,
    pub delta_frequency_hz: i32,
    pub mode: String,
    pub raw_message: String,
    pub frequency_hz: Option<u64>,
    pub band: Option<Band>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
