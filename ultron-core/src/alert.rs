//! Operator alerts for never-worked entities.
//!
//! Activity alerts are rate-limited per entity: at most one per cooldown
//! window, no matter how many decodes arrive. Worked alerts are one-shot.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::dxcc::DxccEntity;
use crate::types::{Band, DxccId};

pub const EVENT_NEW_ENTITY_ACTIVITY: &str = "new_entity_activity";
pub const EVENT_NEW_ENTITY_WORKED: &str = "new_entity_worked";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Alert {
    /// A never-worked entity was heard.
    NewEntityActivity {
        dxcc_id: DxccId,
        entity: String,
        call: String,
        band: Option<Band>,
        snr_db: i32,
        at: DateTime<Utc>,
    },
    /// A contact with a never-worked entity was confirmed.
    NewEntityWorked {
        dxcc_id: DxccId,
        entity: String,
        call: String,
        band: Option<Band>,
        at: DateTime<Utc>,
    },
}

impl Alert {
    pub fn event_type(&self) -> &'static str {
        match self {
            Alert::NewEntityActivity { .. } => EVENT_NEW_ENTITY_ACTIVITY,
            Alert::NewEntityWorked { .. } => EVENT_NEW_ENTITY_WORKED,
        }
    }
}

fn band_label(band: &Option<Band>) -> &'static str {
    band.as_ref().map_or("?", Band::as_str)
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::NewEntityActivity {
                entity,
                call,
                band,
                snr_db,
                ..
            } => write!(
                f,
                "New DXCC activity: {entity} ({call}) on {} at {snr_db} dB",
                band_label(band)
            ),
            Alert::NewEntityWorked {
                entity, call, band, ..
            } => write!(f, "New DXCC worked: {entity} ({call}) on {}", band_label(band)),
        }
    }
}

/// Per-entity cooldown for activity alerts.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    cooldown: TimeDelta,
    last_sent: HashMap<DxccId, DateTime<Utc>>,
}

impl ActivityMonitor {
    pub fn new(cooldown_seconds: u64) -> Self {
        ActivityMonitor {
            cooldown: TimeDelta::seconds(cooldown_seconds.min(u64::from(u32::MAX)) as i64),
            last_sent: HashMap::new(),
        }
    }

    /// Activity alert for `entity`, unless one went out within the cooldown.
    pub fn check(
        &mut self,
        entity: &DxccEntity,
        call: &str,
        band: Option<Band>,
        snr_db: i32,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        if let Some(last) = self.last_sent.get(&entity.id) {
            if now - *last < self.cooldown {
                return None;
            }
        }
        self.last_sent.insert(entity.id, now);
        Some(Alert::NewEntityActivity {
            dxcc_id: entity.id,
            entity: entity.name.clone(),
            call: call.to_string(),
            band,
            snr_db,
            at: now,
        })
    }

    /// Forget an entity once it has been worked.
    pub fn clear(&mut self, id: DxccId) {
        self.last_sent.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entity() -> DxccEntity {
        DxccEntity {
            id: DxccId(1),
            name: "Fictional".into(),
            flag: "xx".into(),
            prefixes: vec!["3XY".into()],
        }
    }

    #[test]
    fn test_cooldown_suppresses_repeats() {
        let mut m = ActivityMonitor::new(1800);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let e = entity();

        assert!(m.check(&e, "3XY3D", Some(Band::M20), -10, t0).is_some());
        assert!(m.check(&e, "3XY3D", Some(Band::M20), -8, t0 + TimeDelta::seconds(600)).is_none());
        assert!(m.check(&e, "3XY3D", Some(Band::M20), -8, t0 + TimeDelta::seconds(1800)).is_some());
    }

    #[test]
    fn test_clear_resets_cooldown() {
        let mut m = ActivityMonitor::new(1800);
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let e = entity();
        m.check(&e, "3XY3D", None, -10, t0);
        m.clear(e.id);
        assert!(m.check(&e, "3XY3D", None, -10, t0).is_some());
    }

    #[test]
    fn test_alert_text_and_json() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let alert = ActivityMonitor::new(60)
            .check(&entity(), "3XY3D", Some(Band::M20), -10, t0)
            .unwrap();
        assert_eq!(alert.to_string(), "New DXCC activity: Fictional (3XY3D) on 20m at -10 dB");
        assert_eq!(alert.event_type(), EVENT_NEW_ENTITY_ACTIVITY);

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["event_type"], "new_entity_activity");
        assert_eq!(json["dxcc_id"], 1);
        assert_eq!(json["band"], "20m");
    }
}
