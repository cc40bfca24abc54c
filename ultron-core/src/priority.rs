//! Whitelist / priority engine.
//!
//! Decides whether a resolved station is worth answering. Tiers are checked
//! in strict precedence order, first match wins:
//!
//! 1. `NewDxcc`         — entity never worked on any band
//! 2. `GlobalWhitelist` — on the global whitelist, not yet worked on this band
//! 3. `BandWhitelist`   — on this band's whitelist, not yet worked on this band
//! 4. `NewBand`         — not yet worked on this band (prefer-whitelist mode only)
//! 5. `None`            — do not pursue
//!
//! Vetoes (bad call-sign syntax, exclusion, unresolved entity) force
//! non-pursuit after the tier is computed. Low SNR only changes the display tag.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use regex::Regex;
use serde::Serialize;

use crate::adif::AdifRecord;
use crate::dxcc::{DxccEntity, Resolver};
use crate::types::{Band, DxccId};

// ---------------------------------------------------------------------------
// Tiers and modes
// ---------------------------------------------------------------------------

/// Pursuit tier. Declaration order is precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Tier {
    NewDxcc,
    GlobalWhitelist,
    BandWhitelist,
    NewBand,
    None,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::NewDxcc => "NEW DXCC",
            Tier::GlobalWhitelist => "GLOBAL WL",
            Tier::BandWhitelist => "BAND WL",
            Tier::NewBand => "NEW BAND",
            Tier::None => "NONE",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WhitelistMode {
    /// Only new entities and whitelisted entities are pursued.
    WhitelistOnly,
    /// Whitelisted entities first, then any entity new to the band.
    PreferWhitelist,
}

impl WhitelistMode {
    pub fn from_flag(whitelist_only: bool) -> Self {
        if whitelist_only {
            WhitelistMode::WhitelistOnly
        } else {
            WhitelistMode::PreferWhitelist
        }
    }
}

// ---------------------------------------------------------------------------
// Call-sign syntax
// ---------------------------------------------------------------------------

fn callsign_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // One or two letters (or a digit and one or two letters, for prefixes
    // such as 3X, 4X, 9A), one digit, one to three letters.
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z]{1,2}|[0-9][A-Z]{1,2})[0-9][A-Z]{1,3}$").expect("valid regex")
    })
}

/// Basic amateur call-sign syntax check. Portable suffixes (`/P`) and
/// hashed calls (`<...>`) fail.
pub fn is_valid_callsign(call: &str) -> bool {
    callsign_re().is_match(&call.trim().to_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Whitelists
// ---------------------------------------------------------------------------

/// One whitelist entry as maintained by the external whitelist manager.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WhitelistEntry {
    pub dxcc_id: DxccId,
    pub name: String,
    /// `high` / `medium` etc.
    pub priority: Option<String>,
    /// Why the entry was selected (`global`, `band_specific`, ...).
    pub kind: Option<String>,
    pub score: Option<f64>,
}

/// Current whitelist content: one global map, one map per band.
#[derive(Debug, Clone, Default)]
pub struct Whitelists {
    pub global: HashMap<DxccId, WhitelistEntry>,
    pub by_band: HashMap<Band, HashMap<DxccId, WhitelistEntry>>,
}

impl Whitelists {
    pub fn in_global(&self, id: DxccId) -> bool {
        self.global.contains_key(&id)
    }

    pub fn in_band(&self, id: DxccId, band: Band) -> bool {
        self.by_band
            .get(&band)
            .is_some_and(|entries| entries.contains_key(&id))
    }

    /// On any whitelist that applies to `band`.
    pub fn contains(&self, id: DxccId, band: Option<Band>) -> bool {
        self.in_global(id) || band.is_some_and(|b| self.in_band(id, b))
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.by_band.values().map(HashMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Worked sets
// ---------------------------------------------------------------------------

/// A confirmed contact with an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkedRecord {
    pub dxcc_id: DxccId,
    pub band: Option<Band>,
    pub callsign: String,
    pub first_worked_at: Option<DateTime<Utc>>,
}

/// Global and per-band worked sets. Each entity appears once globally
/// (first contact kept) and each (entity, band) pair at most once.
#[derive(Debug, Clone, Default)]
pub struct WorkedSets {
    global: HashMap<DxccId, WorkedRecord>,
    by_band: HashSet<(DxccId, Band)>,
}

impl WorkedSets {
    /// Record a contact. Returns `true` when the entity was new globally.
    pub fn mark(&mut self, record: WorkedRecord) -> bool {
        if let Some(band) = record.band {
            self.by_band.insert((record.dxcc_id, band));
        }
        if self.global.contains_key(&record.dxcc_id) {
            return false;
        }
        self.global.insert(record.dxcc_id, record);
        true
    }

    pub fn is_worked(&self, id: DxccId) -> bool {
        self.global.contains_key(&id)
    }

    pub fn is_worked_on(&self, id: DxccId, band: Band) -> bool {
        self.by_band.contains(&(id, band))
    }

    pub fn first_contact(&self, id: DxccId) -> Option<&WorkedRecord> {
        self.global.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.global.len()
    }

    pub fn band_pairs(&self) -> usize {
        self.by_band.len()
    }

    /// Entities worked on `band`.
    pub fn worked_on_band(&self, band: Band) -> usize {
        self.by_band.iter().filter(|(_, b)| *b == band).count()
    }

    /// Seed from the contact log. Each record's call is resolved; when that
    /// fails the record's own `dxcc` field is used. Returns how many records
    /// contributed.
    pub fn seed_from_log(&mut self, records: &[AdifRecord], resolver: &mut Resolver) -> usize {
        let mut used = 0;
        for record in records {
            let Some(call) = record.call() else { continue };
            let id = resolver
                .resolve(call)
                .map(|e| e.id)
                .or_else(|| record.dxcc());
            let Some(dxcc_id) = id else {
                tracing::debug!(call, "log record with unresolvable entity");
                continue;
            };
            self.mark(WorkedRecord {
                dxcc_id,
                band: record.band(),
                callsign: call.to_ascii_uppercase(),
                first_worked_at: record_timestamp(record),
            });
            used += 1;
        }
        used
    }
}

/// `qso_date` + `time_on` as UTC, if both parse.
pub fn record_timestamp(record: &AdifRecord) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(record.get("qso_date")?, "%Y%m%d").ok()?;
    let time_on = record.get("time_on").unwrap_or("000000");
    let time = NaiveTime::parse_from_str(time_on, "%H%M%S")
        .or_else(|_| NaiveTime::parse_from_str(time_on, "%H%M"))
        .ok()?;
    Some(date.and_time(time).and_utc())
}

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

/// Calls that timed out. Cleared once per :00 / :30 minute.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    calls: HashSet<String>,
    /// Minute (unix minutes) of the last boundary clear.
    cleared_minute: Option<i64>,
}

impl ExclusionSet {
    pub fn insert(&mut self, call: &str) {
        self.calls.insert(call.to_ascii_uppercase());
    }

    pub fn contains(&self, call: &str) -> bool {
        self.calls.contains(&call.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Clear if `now` falls in a :00 or :30 minute not already cleared.
    /// Returns `true` when a clear happened.
    pub fn clear_at_boundary(&mut self, now: DateTime<Utc>) -> bool {
        if now.minute() % 30 != 0 {
            return false;
        }
        let minute = now.timestamp().div_euclid(60);
        if self.cleared_minute == Some(minute) {
            return false;
        }
        self.cleared_minute = Some(minute);
        self.calls.clear();
        true
    }
}

// ---------------------------------------------------------------------------
// Assessment
// ---------------------------------------------------------------------------

/// Why a candidate was refused regardless of tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Veto {
    BadCallsign,
    Excluded,
    Unresolved,
}

/// Operator display tag for one decode line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tag {
    Pursue,
    Skip,
    LowSnr,
    Excluded,
    BadCall,
    Chatter,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Pursue => ">>",
            Tag::Skip => "##",
            Tag::LowSnr => "Lo",
            Tag::Excluded => "XX",
            Tag::BadCall => "FL",
            Tag::Chatter => "--",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine verdict for one candidate station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub tier: Tier,
    pub veto: Option<Veto>,
    pub whitelisted: bool,
    pub low_snr: bool,
}

impl Assessment {
    pub fn pursue(&self) -> bool {
        self.veto.is_none() && self.tier != Tier::None
    }

    pub fn tag(&self) -> Tag {
        match self.veto {
            Some(Veto::BadCallsign) => Tag::BadCall,
            Some(Veto::Excluded) => Tag::Excluded,
            Some(Veto::Unresolved) => Tag::Skip,
            None if self.tier == Tier::None => Tag::Skip,
            None if self.low_snr => Tag::LowSnr,
            None => Tag::Pursue,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PriorityEngine {
    pub mode: WhitelistMode,
    pub low_snr_threshold_db: i32,
    pub worked: WorkedSets,
    pub whitelists: Whitelists,
}

impl PriorityEngine {
    pub fn new(mode: WhitelistMode, low_snr_threshold_db: i32) -> Self {
        PriorityEngine {
            mode,
            low_snr_threshold_db,
            worked: WorkedSets::default(),
            whitelists: Whitelists::default(),
        }
    }

    /// Tier for an entity on a band. An unknown band can only yield
    /// `NewDxcc` or `GlobalWhitelist`.
    pub fn classify(&self, id: DxccId, band: Option<Band>) -> Tier {
        if !self.worked.is_worked(id) {
            return Tier::NewDxcc;
        }
        let new_on_band = band.map(|b| !self.worked.is_worked_on(id, b));

        if self.whitelists.in_global(id) && new_on_band != Some(false) {
            return Tier::GlobalWhitelist;
        }
        if let (Some(b), Some(true)) = (band, new_on_band) {
            if self.whitelists.in_band(id, b) {
                return Tier::BandWhitelist;
            }
            if self.mode == WhitelistMode::PreferWhitelist {
                return Tier::NewBand;
            }
        }
        Tier::None
    }

    /// Full verdict for a station: tier, vetoes, and display flags.
    pub fn assess(
        &self,
        call: &str,
        entity: Option<&DxccEntity>,
        band: Option<Band>,
        snr_db: i32,
        exclusions: &ExclusionSet,
    ) -> Assessment {
        let tier = entity.map_or(Tier::None, |e| self.classify(e.id, band));
        let whitelisted = entity.is_some_and(|e| self.whitelists.contains(e.id, band));

        let veto = if !is_valid_callsign(call) {
            Some(Veto::BadCallsign)
        } else if exclusions.contains(call) {
            Some(Veto::Excluded)
        } else if entity.is_none() {
            Some(Veto::Unresolved)
        } else {
            None
        };

        Assessment {
            tier,
            veto,
            whitelisted,
            low_snr: snr_db <= self.low_snr_threshold_db,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dxcc::PrefixTable;
    use chrono::TimeZone;

    const JAPAN: DxccId = DxccId(339);

    fn entry(id: DxccId) -> WhitelistEntry {
        WhitelistEntry {
            dxcc_id: id,
            name: "Japan".into(),
            priority: Some("high".into()),
            kind: None,
            score: Some(8.5),
        }
    }

    fn worked(id: DxccId, band: Band) -> WorkedRecord {
        WorkedRecord {
            dxcc_id: id,
            band: Some(band),
            callsign: "JA1XYZ".into(),
            first_worked_at: None,
        }
    }

    fn engine(mode: WhitelistMode) -> PriorityEngine {
        PriorityEngine::new(mode, -20)
    }

    fn japan() -> DxccEntity {
        DxccEntity {
            id: JAPAN,
            name: "Japan".into(),
            flag: "jp".into(),
            prefixes: vec!["JA".into()],
        }
    }

    #[test]
    fn test_new_dxcc_beats_whitelists() {
        let mut e = engine(WhitelistMode::WhitelistOnly);
        e.whitelists.global.insert(JAPAN, entry(JAPAN));
        assert_eq!(e.classify(JAPAN, Some(Band::M20)), Tier::NewDxcc);
        assert_eq!(e.classify(JAPAN, None), Tier::NewDxcc);
    }

    #[test]
    fn test_global_whitelist_until_worked_on_band() {
        let mut e = engine(WhitelistMode::WhitelistOnly);
        e.whitelists.global.insert(JAPAN, entry(JAPAN));
        e.worked.mark(worked(JAPAN, Band::M40));
        assert_eq!(e.classify(JAPAN, Some(Band::M20)), Tier::GlobalWhitelist);
        assert_eq!(e.classify(JAPAN, Some(Band::M40)), Tier::None);
        assert_eq!(e.classify(JAPAN, None), Tier::GlobalWhitelist);
    }

    #[test]
    fn test_band_whitelist() {
        let mut e = engine(WhitelistMode::WhitelistOnly);
        e.worked.mark(worked(JAPAN, Band::M40));
        e.whitelists
            .by_band
            .entry(Band::M15)
            .or_default()
            .insert(JAPAN, entry(JAPAN));
        assert_eq!(e.classify(JAPAN, Some(Band::M15)), Tier::BandWhitelist);
        assert_eq!(e.classify(JAPAN, Some(Band::M20)), Tier::None);
        assert_eq!(e.classify(JAPAN, None), Tier::None);
    }

    #[test]
    fn test_new_band_only_in_prefer_mode() {
        let mut prefer = engine(WhitelistMode::PreferWhitelist);
        prefer.worked.mark(worked(JAPAN, Band::M40));
        assert_eq!(prefer.classify(JAPAN, Some(Band::M20)), Tier::NewBand);
        assert_eq!(prefer.classify(JAPAN, Some(Band::M40)), Tier::None);
        assert_eq!(prefer.classify(JAPAN, None), Tier::None);

        let mut only = engine(WhitelistMode::WhitelistOnly);
        only.worked.mark(worked(JAPAN, Band::M40));
        assert_eq!(only.classify(JAPAN, Some(Band::M20)), Tier::None);
    }

    #[test]
    fn test_confirmed_band_never_reclassified() {
        let mut e = engine(WhitelistMode::PreferWhitelist);
        e.whitelists.global.insert(JAPAN, entry(JAPAN));
        e.whitelists
            .by_band
            .entry(Band::M20)
            .or_default()
            .insert(JAPAN, entry(JAPAN));
        e.worked.mark(worked(JAPAN, Band::M20));
        assert_eq!(e.classify(JAPAN, Some(Band::M20)), Tier::None);
        assert_eq!(e.classify(JAPAN, Some(Band::M17)), Tier::GlobalWhitelist);
    }

    #[test]
    fn test_worked_sets_first_contact_kept() {
        let mut w = WorkedSets::default();
        assert!(w.mark(worked(JAPAN, Band::M40)));
        let mut later = worked(JAPAN, Band::M20);
        later.callsign = "JH1AAA".into();
        assert!(!w.mark(later));
        assert_eq!(w.entity_count(), 1);
        assert_eq!(w.band_pairs(), 2);
        assert_eq!(w.first_contact(JAPAN).unwrap().callsign, "JA1XYZ");
        assert_eq!(w.worked_on_band(Band::M20), 1);
    }

    #[test]
    fn test_callsign_syntax() {
        assert!(is_valid_callsign("K1ABC"));
        assert!(is_valid_callsign("LU9DCE"));
        assert!(is_valid_callsign("3XY3D"));
        assert!(is_valid_callsign("ja1xyz"));
        assert!(!is_valid_callsign("K1ABC/P"));
        assert!(!is_valid_callsign("<...>"));
        assert!(!is_valid_callsign("FN42"), "a grid is not a call");
        assert!(!is_valid_callsign("ABC1D"));
    }

    #[test]
    fn test_assess_vetoes() {
        let e = engine(WhitelistMode::PreferWhitelist);
        let mut ex = ExclusionSet::default();
        let jp = japan();

        let a = e.assess("JA1XYZ", Some(&jp), Some(Band::M20), -5, &ex);
        assert!(a.pursue());
        assert_eq!(a.tag(), Tag::Pursue);

        ex.insert("ja1xyz");
        let a = e.assess("JA1XYZ", Some(&jp), Some(Band::M20), -5, &ex);
        assert_eq!(a.veto, Some(Veto::Excluded));
        assert_eq!(a.tag(), Tag::Excluded);
        assert!(!a.pursue());

        let a = e.assess("JA1XYZ/P", Some(&jp), Some(Band::M20), -5, &ex);
        assert_eq!(a.tag(), Tag::BadCall);

        let a = e.assess("Q1ZZZ", None, Some(Band::M20), -5, &ex);
        assert_eq!(a.veto, Some(Veto::Unresolved));
        assert!(!a.pursue());
    }

    #[test]
    fn test_low_snr_is_cosmetic() {
        let e = engine(WhitelistMode::PreferWhitelist);
        let a = e.assess("JA1XYZ", Some(&japan()), Some(Band::M20), -22, &ExclusionSet::default());
        assert!(a.low_snr);
        assert!(a.pursue(), "low SNR must not veto");
        assert_eq!(a.tag(), Tag::LowSnr);
    }

    #[test]
    fn test_exclusions_clear_once_per_boundary() {
        let mut ex = ExclusionSet::default();
        ex.insert("K1ABC");
        let t = |h, m, s| Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap();

        assert!(!ex.clear_at_boundary(t(12, 29, 59)));
        assert!(ex.contains("K1ABC"));
        assert!(ex.clear_at_boundary(t(12, 30, 0)));
        assert!(ex.is_empty());

        ex.insert("K1ABC");
        assert!(!ex.clear_at_boundary(t(12, 30, 45)), "same minute clears once");
        assert!(ex.contains("K1ABC"));
        assert!(ex.clear_at_boundary(t(13, 0, 15)));
        assert!(!ex.contains("K1ABC"));
    }

    #[test]
    fn test_seed_from_log() {
        let table = PrefixTable::from_json(
            r#"[{"id": 339, "flag": "jp", "name": "Japan", "licencia": "Japan JA"}]"#,
        )
        .unwrap();
        let mut resolver = Resolver::new(table);

        let mut a = AdifRecord::new();
        a.set("call", "JA1XYZ");
        a.set("band", "20m");
        a.set("qso_date", "20250102");
        a.set("time_on", "1530");
        let mut b = AdifRecord::new();
        b.set("call", "Q1ZZZ");
        b.set("band", "40m");
        b.set("dxcc", "291");
        let mut c = AdifRecord::new();
        c.set("call", "Q2ZZZ");

        let mut w = WorkedSets::default();
        assert_eq!(w.seed_from_log(&[a, b, c], &mut resolver), 2);
        assert!(w.is_worked_on(JAPAN, Band::M20));
        assert!(w.is_worked_on(DxccId(291), Band::M40));
        assert_eq!(
            w.first_contact(JAPAN).unwrap().first_worked_at,
            Some(Utc.with_ymd_and_hms(2025, 1, 2, 15, 30, 0).unwrap())
        );
    }
}
