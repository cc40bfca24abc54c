//! Configuration file management for ultron.
//!
//! Reads/writes `~/.ultron/config.json` with engine options, file locations
//! and UDP endpoints. Every field has a default, so partial files are fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Band, Result, UltronError};

/// Options that shape pursuit decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Only pursue new entities and whitelisted entities (no NEW BAND tier).
    pub whitelist_only_mode: bool,
    /// Bands whose per-band whitelist files are loaded.
    pub priority_bands: Vec<Band>,
    /// Minimum gap between two activity alerts for the same entity.
    pub notification_cooldown_seconds: u64,
    /// Halt TX when the radio software transmits while the robot is idle.
    pub halt_unsolicited_tx: bool,
    /// Watchdog window after a reply.
    pub response_timeout_seconds: u64,
    /// Decodes at or below this SNR are tagged `Lo`.
    pub low_snr_threshold_db: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            whitelist_only_mode: false,
            priority_bands: Band::ALL.to_vec(),
            notification_cooldown_seconds: 1800,
            halt_unsolicited_tx: true,
            response_timeout_seconds: 90,
            low_snr_threshold_db: -20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Contact log (field-tagged records).
    pub log_file: PathBuf,
    /// DXCC reference table (JSON).
    pub reference_table: PathBuf,
    /// Directory holding `dxcc_whitelist_*.json`.
    pub whitelist_dir: PathBuf,
    pub worked_cache: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            log_file: "wsjtx_log.adi".into(),
            reference_table: "base.json".into(),
            whitelist_dir: ".".into(),
            worked_cache: "dxcc_worked_cache.json".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_host: String,
    pub listen_port: u16,
    /// Every inbound datagram is forwarded here; `None` disables relaying.
    pub relay: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_host: "0.0.0.0".into(),
            listen_port: 2237,
            relay: Some("127.0.0.1:2277".into()),
        }
    }
}

/// Full configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub paths: PathsConfig,
    pub network: NetworkConfig,
}

/// Get the config directory path (`~/.ultron/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".ultron")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.ultron/config.json`.
///
/// Returns default config if the file doesn't exist or can't be parsed.
pub fn load_config() -> Config {
    load_config_from(&config_file())
}

pub fn load_config_from(path: &Path) -> Config {
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(path)
        .map_err(UltronError::from)
        .and_then(|text| parse_config(&text))
    {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unusable config, using defaults");
            Config::default()
        }
    }
}

fn parse_config(text: &str) -> Result<Config> {
    Ok(serde_json::from_str(text)?)
}

/// Save config to `~/.ultron/config.json`.
pub fn save_config(config: &Config) -> Result<PathBuf> {
    save_config_to(config, &config_file())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| UltronError::Config(e.to_string()))?;
    }
    let text = serde_json::to_string_pretty(config)?;
    std::fs::write(path, text + "\n").map_err(|e| UltronError::Config(e.to_string()))?;
    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
