//! Field-tagged contact records (`<name:length>value` tokens).
//!
//! Parsing is lenient: names are case-insensitive, a declared length that
//! overruns the text falls back to "up to the next tag", and records without
//! a `call` field are dropped. Serialization always uses the canonical form:
//! UPPERCASE names, one `<EOR>` per record.

use serde::Serialize;

use crate::types::{Band, DxccId};

/// One contact record. Field names are stored lowercase, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdifRecord {
    fields: Vec<(String, String)>,
}

impl AdifRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive field lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a field.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn call(&self) -> Option<&str> {
        self.get("call")
    }

    pub fn band(&self) -> Option<Band> {
        self.get("band").and_then(|b| b.parse().ok())
    }

    pub fn mode(&self) -> Option<&str> {
        self.get("mode")
    }

    pub fn dxcc(&self) -> Option<DxccId> {
        self.get("dxcc").and_then(|d| d.parse().ok())
    }

    pub fn country(&self) -> Option<&str> {
        self.get("country")
    }

    /// Canonical single-line form, terminated by `<EOR>` and a newline.
    pub fn to_adif(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push_str(&format!(
                "<{}:{}>{} ",
                name.to_ascii_uppercase(),
                value.len(),
                value
            ));
        }
        out.push_str("<EOR>\n");
        out
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse every record in `text`. A header (anything before `<EOH>`) is
/// skipped; a trailing record without `<EOR>` is kept.
pub fn parse_records(text: &str) -> Vec<AdifRecord> {
    // ASCII lowercasing keeps byte offsets identical.
    let lower = text.to_ascii_lowercase();
    let mut pos = lower.find("<eoh>").map(|i| i + 5).unwrap_or(0);

    let mut records = Vec::new();
    let mut current = AdifRecord::new();

    while let Some(open) = lower[pos..].find('<') {
        let tag_start = pos + open + 1;
        let Some(close) = lower[tag_start..].find('>') else {
            break;
        };
        let tag_end = tag_start + close;
        let tag = &lower[tag_start..tag_end];
        pos = tag_end + 1;

        let mut parts = tag.split(':');
        let name = parts.next().unwrap_or("").trim();
        let declared = parts.next().and_then(|l| l.trim().parse::<usize>().ok());

        match name {
            "eor" => {
                finish_record(&mut records, std::mem::take(&mut current));
                continue;
            }
            "eoh" | "" => {
                current = AdifRecord::new();
                continue;
            }
            _ => {}
        }

        let value_end = match declared {
            Some(len)
                if pos + len <= text.len()
                    && text.is_char_boundary(pos + len)
                    && !text[pos..pos + len].contains('<') =>
            {
                pos + len
            }
            _ => lower[pos..].find('<').map(|i| pos + i).unwrap_or(text.len()),
        };
        let value = text[pos..value_end].trim();
        pos = value_end;

        if !value.is_empty() {
            current.set(name, value);
        }
    }

    finish_record(&mut records, current);
    records
}

fn finish_record(records: &mut Vec<AdifRecord>, record: AdifRecord) {
    if record.is_empty() {
        return;
    }
    match record.call() {
        Some(call) if !call.is_empty() => records.push(record),
        _ => tracing::debug!(?record, "skipping log record without call"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_record() {
        let recs = parse_records("<call:5>K1ABC <band:3>20m <mode:3>FT8 <eor>");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].call(), Some("K1ABC"));
        assert_eq!(recs[0].band(), Some(Band::M20));
        assert_eq!(recs[0].mode(), Some("FT8"));
    }

    #[test]
    fn test_names_case_insensitive() {
        let recs = parse_records("<CALL:5>K1ABC <Band:3>40M <EOR>");
        assert_eq!(recs[0].get("call"), Some("K1ABC"));
        assert_eq!(recs[0].get("BAND"), Some("40M"));
        assert_eq!(recs[0].band(), Some(Band::M40));
    }

    #[test]
    fn test_header_skipped() {
        let text = "Exported log\n<ADIF_VER:5>3.1.0 <PROGRAMID:6>WSJT-X\n<EOH>\n\
                    <CALL:4>EA1A <EOR>\n<CALL:5>JA1XY <EOR>\n";
        let recs = parse_records(text);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].get("programid"), None);
        assert_eq!(recs[1].call(), Some("JA1XY"));
    }

    #[test]
    fn test_record_without_call_skipped() {
        let recs = parse_records("<band:3>20m <eor><call:4>EA1A <eor>");
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].call(), Some("EA1A"));
    }

    #[test]
    fn test_bad_length_falls_back() {
        let recs = parse_records("<call:99>K1ABC <band:3>20m <eor>");
        assert_eq!(recs[0].call(), Some("K1ABC"));
        assert_eq!(recs[0].get("band"), Some("20m"));
    }

    #[test]
    fn test_typed_length_field() {
        let recs = parse_records("<call:5:S>K1ABC <dxcc:3:N>291 <eor>");
        assert_eq!(recs[0].dxcc(), Some(DxccId(291)));
    }

    #[test]
    fn test_trailing_record_without_eor() {
        let recs = parse_records("<call:4>EA1A <eor><call:5>K1ABC <band:3>20m");
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].call(), Some("K1ABC"));
    }

    #[test]
    fn test_empty_values_dropped() {
        let recs = parse_records("<call:4>EA1A <gridsquare:0> <eor>");
        assert_eq!(recs[0].get("gridsquare"), None);
    }

    #[test]
    fn test_canonical_output() {
        let mut rec = AdifRecord::new();
        rec.set("call", "K1ABC");
        rec.set("band", "20m");
        rec.set("CALL", "K1ABD");
        assert_eq!(rec.to_adif(), "<CALL:5>K1ABD <BAND:3>20m <EOR>\n");

        let parsed = parse_records(&rec.to_adif());
        assert_eq!(parsed, vec![rec]);
    }
}
