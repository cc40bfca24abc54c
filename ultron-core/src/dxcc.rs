//! DXCC entity resolution: call sign → country/territory.
//!
//! The reference table is a JSON array of `{id, flag, name, licencia}` rows,
//! where `licencia` is "<entity name> <prefix> <prefix> ...". Prefixes may
//! carry portable annotations (`KH6/L`, `VP8(SG)`); everything from the first
//! `/` or `(` is stripped at load time.
//!
//! Resolution tries the whole call, then drops one trailing character at a
//! time, and returns the entity owning the first exact prefix match. When two
//! entities list the same prefix, the one earlier in the table wins.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{DxccId, Result, UltronError};

/// One DXCC entity from the reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DxccEntity {
    pub id: DxccId,
    pub name: String,
    pub flag: String,
    pub prefixes: Vec<String>,
}

/// Reference table rows use both numeric and string ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawRow {
    id: RawId,
    #[serde(default)]
    flag: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    licencia: String,
}

/// Strip a portable-operation annotation from a table prefix.
pub fn clean_prefix(prefix: &str) -> &str {
    match prefix.find(['/', '(']) {
        Some(i) => &prefix[..i],
        None => prefix,
    }
}

/// Prefix tokens from a `licencia` string. The first token is the entity
/// name and is skipped.
pub fn parse_licencia(licencia: &str) -> Vec<String> {
    licencia
        .split_whitespace()
        .skip(1)
        .map(|p| clean_prefix(p).to_ascii_uppercase())
        .filter(|p| !p.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Prefix table
// ---------------------------------------------------------------------------

/// Immutable entity table with a prefix index.
#[derive(Debug, Clone, Default)]
pub struct PrefixTable {
    entities: Vec<DxccEntity>,
    /// prefix → index of the first entity (table order) that lists it.
    index: HashMap<String, usize>,
}

impl PrefixTable {
    pub fn from_entities(entities: Vec<DxccEntity>) -> Self {
        let mut index = HashMap::new();
        for (i, entity) in entities.iter().enumerate() {
            for prefix in &entity.prefixes {
                index.entry(prefix.clone()).or_insert(i);
            }
        }
        PrefixTable { entities, index }
    }

    /// Parse the JSON reference table. Rows whose id is not numeric are
    /// skipped with a warning.
    pub fn from_json(json: &str) -> Result<Self> {
        let rows: Vec<RawRow> = serde_json::from_str(json)?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let id = match &row.id {
                RawId::Number(n) => u32::try_from(*n).ok().map(DxccId),
                RawId::Text(s) => s.parse().ok(),
            };
            let Some(id) = id else {
                tracing::warn!(name = %row.name, "skipping reference row with non-numeric id");
                continue;
            };
            entities.push(DxccEntity {
                id,
                prefixes: parse_licencia(&row.licencia),
                name: row.name,
                flag: row.flag,
            });
        }
        if entities.is_empty() {
            return Err(UltronError::Table("no usable entities".into()));
        }
        Ok(Self::from_entities(entities))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            UltronError::Table(format!("cannot read {}: {e}", path.display()))
        })?;
        let table = Self::from_json(&json)?;
        tracing::info!(
            path = %path.display(),
            entities = table.len(),
            prefixes = table.index.len(),
            "loaded reference table"
        );
        Ok(table)
    }

    /// Longest-prefix lookup, no caching.
    pub fn lookup(&self, callsign: &str) -> Option<&DxccEntity> {
        self.lookup_index(callsign).map(|i| &self.entities[i])
    }

    fn lookup_index(&self, callsign: &str) -> Option<usize> {
        let call = callsign.trim().to_ascii_uppercase();
        let mut ends: Vec<usize> = call.char_indices().map(|(i, c)| i + c.len_utf8()).collect();
        ends.reverse();
        ends.into_iter()
            .find_map(|end| self.index.get(&call[..end]).copied())
    }

    pub fn get(&self, id: DxccId) -> Option<&DxccEntity> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn entities(&self) -> &[DxccEntity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Table lookup memoized per call sign for the life of the process.
#[derive(Debug)]
pub struct Resolver {
    table: PrefixTable,
    cache: HashMap<String, Option<usize>>,
}

impl Resolver {
    pub fn new(table: PrefixTable) -> Self {
        Resolver {
            table,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, callsign: &str) -> Option<&DxccEntity> {
        let key = callsign.trim().to_ascii_uppercase();
        let table = &self.table;
        let slot = *self
            .cache
            .entry(key)
            .or_insert_with_key(|k| table.lookup_index(k));
        slot.map(|i| &self.table.entities[i])
    }

    pub fn table(&self) -> &PrefixTable {
        &self.table
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"[
        {"id": 291, "flag": "us", "name": "United States", "licencia": "UnitedStates K W N AA AB"},
        {"id": "339", "flag": "jp", "name": "Japan", "licencia": "Japan JA JE JR 7J"},
        {"id": 110, "flag": "us", "name": "Hawaii", "licencia": "Hawaii KH6 KH7/L NH6(HI)"},
        {"id": 1, "flag": "xx", "name": "Fictional", "licencia": "Fictional 3XY"},
        {"id": 2, "flag": "yy", "name": "Guinea", "licencia": "Guinea 3X"},
        {"id": 3, "flag": "dup", "name": "Shadow", "licencia": "Shadow KH6"},
        {"id": "n/a", "flag": "", "name": "Deleted", "licencia": "Deleted ZZ"}
    ]"#;

    fn table() -> PrefixTable {
        PrefixTable::from_json(TABLE).unwrap()
    }

    #[test]
    fn test_parse_licencia_strips_annotations() {
        assert_eq!(
            parse_licencia("Hawaii KH6 KH7/L NH6(HI)"),
            vec!["KH6", "KH7", "NH6"]
        );
        assert!(parse_licencia("NameOnly").is_empty());
    }

    #[test]
    fn test_non_numeric_rows_skipped() {
        let t = table();
        assert_eq!(t.len(), 6);
        assert!(t.lookup("ZZ1A").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let t = table();
        assert_eq!(t.lookup("KH6ABC").unwrap().name, "Hawaii");
        assert_eq!(t.lookup("K1ABC").unwrap().name, "United States");
        assert_eq!(t.lookup("3XY3D").unwrap().name, "Fictional");
        assert_eq!(t.lookup("3X2A").unwrap().name, "Guinea");
    }

    #[test]
    fn test_tie_goes_to_table_order() {
        assert_eq!(table().lookup("KH6XX").unwrap().id, DxccId(110));
    }

    #[test]
    fn test_unknown_call() {
        assert!(table().lookup("Q1ZZZ").is_none());
        assert!(table().lookup("").is_none());
    }

    #[test]
    fn test_lowercase_input() {
        assert_eq!(table().lookup("ja1xyz").unwrap().id, DxccId(339));
    }

    #[test]
    fn test_stripped_annotation_matches() {
        assert_eq!(table().lookup("KH7XX").unwrap().name, "Hawaii");
        assert_eq!(table().lookup("NH6A").unwrap().name, "Hawaii");
    }

    #[test]
    fn test_resolver_memoizes() {
        let mut r = Resolver::new(table());
        assert_eq!(r.resolve("JA1XYZ").unwrap().id, DxccId(339));
        assert_eq!(r.resolve("ja1xyz").unwrap().id, DxccId(339));
        assert!(r.resolve("Q1ZZZ").is_none());
        assert!(r.resolve("Q1ZZZ").is_none());
        assert_eq!(r.cached(), 2);
    }

    #[test]
    fn test_get_by_id() {
        assert_eq!(table().get(DxccId(291)).unwrap().flag, "us");
        assert!(table().get(DxccId(999)).is_none());
    }

    #[test]
    fn test_empty_table_rejected() {
        assert!(PrefixTable::from_json("[]").is_err());
        assert!(PrefixTable::from_json("not json").is_err());
    }
}
