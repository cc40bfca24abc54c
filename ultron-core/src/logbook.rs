//! Log Store: the append-only contact log.
//!
//! Read once at startup to seed worked state, then only appended to.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::adif::{self, AdifRecord};
use crate::types::Result;

const NEW_LOG_HEADER: &str = "ULTRON contact log\n<ADIF_VER:5>3.1.0 <PROGRAMID:6>ULTRON <EOH>\n";

#[derive(Debug, Clone)]
pub struct Logbook {
    path: PathBuf,
}

impl Logbook {
    /// A handle on `path` without touching the disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Logbook { path: path.into() }
    }

    /// Open the log at `path`, creating it (with a header) if missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&path, NEW_LOG_HEADER)?;
            tracing::info!(path = %path.display(), "created contact log");
        }
        Ok(Logbook { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every well-formed record in the log. Malformed records are skipped.
    pub fn scan(&self) -> Result<Vec<AdifRecord>> {
        let bytes = fs::read(&self.path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(adif::parse_records(&text))
    }

    /// Append one record in canonical form.
    pub fn append(&self, record: &AdifRecord) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(record.to_adif().as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(call: &str, band: &str) -> AdifRecord {
        let mut r = AdifRecord::new();
        r.set("call", call);
        r.set("band", band);
        r.set("mode", "FT8");
        r
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/wsjtx_log.adi");
        let log = Logbook::open(&path).unwrap();
        assert!(path.exists());
        assert!(log.scan().unwrap().is_empty(), "fresh log has no records");
    }

    #[test]
    fn test_append_then_scan() {
        let dir = tempfile::tempdir().unwrap();
        let log = Logbook::open(dir.path().join("log.adi")).unwrap();
        log.append(&record("K1ABC", "20m")).unwrap();
        log.append(&record("JA1XYZ", "40m")).unwrap();

        let recs = log.scan().unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].call(), Some("K1ABC"));
        assert_eq!(recs[1].get("band"), Some("40m"));
    }

    #[test]
    fn test_existing_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.adi");
        fs::write(&path, "<call:4>EA1A <band:3>20m <eor>\n<band:3>40m <eor>\n").unwrap();
        let log = Logbook::open(&path).unwrap();
        let recs = log.scan().unwrap();
        assert_eq!(recs.len(), 1, "record without call is skipped");
        assert_eq!(recs[0].call(), Some("EA1A"));
    }
}
