//! On-disk whitelist and worked-cache files.
//!
//! Both are JSON objects keyed by DXCC id:
//! - `dxcc_whitelist_global.json`, `dxcc_whitelist_<band>.json`:
//!   `{"339": {"name": "Japan", "priority": "high", "type": "global", "score": 8.5}}`
//! - `dxcc_worked_cache.json`:
//!   `{"339": {"name": "Japan", "first_worked": "2025-01-02 15:30:00", "band": "20m", "call": "JA1XYZ"}}`
//!
//! An empty JSON array is accepted as an empty object. Files are always read
//! and written whole.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::priority::{WhitelistEntry, Whitelists, WorkedRecord, WorkedSets};
use crate::types::{Band, DxccId, Result, UltronError};

pub const GLOBAL_WHITELIST_FILE: &str = "dxcc_whitelist_global.json";
pub const WORKED_CACHE_FILE: &str = "dxcc_worked_cache.json";

const FIRST_WORKED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Read a `{id: entry}` JSON object. Missing file → empty. Entries with a
/// non-numeric key or an unreadable body are skipped.
fn read_keyed<T: DeserializeOwned>(path: &Path) -> Result<Vec<(DxccId, T)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    let map = match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => map,
        Value::Array(items) if items.is_empty() => return Ok(Vec::new()),
        _ => {
            return Err(UltronError::Config(format!(
                "{}: expected a JSON object",
                path.display()
            )))
        }
    };

    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let Ok(id) = key.parse::<DxccId>() else {
            tracing::warn!(path = %path.display(), key = %key, "skipping non-numeric entity key");
            continue;
        };
        match serde_json::from_value::<T>(value) {
            Ok(entry) => out.push((id, entry)),
            Err(e) => tracing::warn!(path = %path.display(), key = %key, error = %e, "skipping bad entry"),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Whitelists
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawWhitelistEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

/// Whitelist files in one directory.
#[derive(Debug, Clone)]
pub struct WhitelistStore {
    dir: PathBuf,
}

impl WhitelistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        WhitelistStore { dir: dir.into() }
    }

    pub fn global_path(&self) -> PathBuf {
        self.dir.join(GLOBAL_WHITELIST_FILE)
    }

    pub fn band_path(&self, band: Band) -> PathBuf {
        self.dir.join(format!("dxcc_whitelist_{band}.json"))
    }

    fn load(path: &Path) -> Result<HashMap<DxccId, WhitelistEntry>> {
        Ok(read_keyed::<RawWhitelistEntry>(path)?
            .into_iter()
            .map(|(id, raw)| {
                let entry = WhitelistEntry {
                    dxcc_id: id,
                    name: raw.name,
                    priority: raw.priority,
                    kind: raw.kind,
                    score: raw.score,
                };
                (id, entry)
            })
            .collect())
    }

    pub fn load_global(&self) -> Result<HashMap<DxccId, WhitelistEntry>> {
        Self::load(&self.global_path())
    }

    pub fn load_band(&self, band: Band) -> Result<HashMap<DxccId, WhitelistEntry>> {
        Self::load(&self.band_path(band))
    }

    /// Re-read the global file and one file per band in `bands`. A file
    /// that fails to read keeps its previous content. Returns the number
    /// of files that failed.
    pub fn reload_into(&self, whitelists: &mut Whitelists, bands: &[Band]) -> usize {
        let mut failures = 0;
        match self.load_global() {
            Ok(global) => whitelists.global = global,
            Err(e) => {
                failures += 1;
                tracing::warn!(path = %self.global_path().display(), error = %e, "whitelist reload failed");
            }
        }
        for &band in bands {
            match self.load_band(band) {
                Ok(entries) => {
                    whitelists.by_band.insert(band, entries);
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(path = %self.band_path(band).display(), error = %e, "whitelist reload failed");
                }
            }
        }
        whitelists.by_band.retain(|band, _| bands.contains(band));
        failures
    }
}

// ---------------------------------------------------------------------------
// Worked cache
// ---------------------------------------------------------------------------

/// One entity's first confirmed contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkedCacheEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub first_worked: String,
    #[serde(default)]
    pub band: String,
    #[serde(default)]
    pub call: String,
}

impl WorkedCacheEntry {
    pub fn new(name: &str, record: &WorkedRecord) -> Self {
        WorkedCacheEntry {
            name: name.to_string(),
            first_worked: record
                .first_worked_at
                .map(format_first_worked)
                .unwrap_or_default(),
            band: record.band.map(|b| b.to_string()).unwrap_or_default(),
            call: record.callsign.clone(),
        }
    }

    pub fn to_record(&self, id: DxccId) -> WorkedRecord {
        WorkedRecord {
            dxcc_id: id,
            band: self.band.parse().ok(),
            callsign: self.call.clone(),
            first_worked_at: NaiveDateTime::parse_from_str(&self.first_worked, FIRST_WORKED_FORMAT)
                .ok()
                .map(|t| t.and_utc()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkedCache {
    path: PathBuf,
}

impl WorkedCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        WorkedCache { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries ordered by id.
    pub fn load(&self) -> Result<BTreeMap<DxccId, WorkedCacheEntry>> {
        Ok(read_keyed(&self.path)?.into_iter().collect())
    }

    /// Merge every cached entity into `worked`. Returns the number merged.
    pub fn seed(&self, worked: &mut WorkedSets) -> Result<usize> {
        let entries = self.load()?;
        for (id, entry) in &entries {
            worked.mark(entry.to_record(*id));
        }
        Ok(entries.len())
    }

    /// Add an entity if absent, rewriting the whole file. Returns `false`
    /// when the entity was already cached.
    pub fn record(&self, id: DxccId, entry: WorkedCacheEntry) -> Result<bool> {
        let mut entries = self.load()?;
        if entries.contains_key(&id) {
            return Ok(false);
        }
        entries.insert(id, entry);
        self.save(&entries)?;
        Ok(true)
    }

    fn save(&self, entries: &BTreeMap<DxccId, WorkedCacheEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let keyed: BTreeMap<String, &WorkedCacheEntry> =
            entries.iter().map(|(id, e)| (id.to_string(), e)).collect();
        fs::write(&self.path, serde_json::to_string_pretty(&keyed)?)?;
        Ok(())
    }
}

/// `now` in the worked-cache timestamp format.
pub fn format_first_worked(now: DateTime<Utc>) -> String {
    now.format(FIRST_WORKED_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
