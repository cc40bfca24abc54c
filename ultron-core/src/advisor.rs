//! Seam for an optional advisory collaborator.
//!
//! An advisor sees the engine's verdict and may override it. Anything it
//! cannot answer in time, or answers unintelligibly, is `NoOpinion` and the
//! engine's tier stands. Implementations own their timeouts: the pursuit
//! loop calls `advise` inline.

use serde::Serialize;
use serde_json::Value;

use crate::priority::Tier;
use crate::types::{Band, DxccId};

/// What the advisor is told about one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdvisoryContext {
    pub call: String,
    pub dxcc_id: DxccId,
    pub entity: String,
    pub band: Option<Band>,
    pub mode: String,
    pub snr_db: i32,
    pub tier: Tier,
    pub whitelisted: bool,
    pub worked_entities: usize,
    pub worked_on_band: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Advice {
    Pursue,
    Skip,
    NoOpinion,
}

pub trait Advisor {
    fn advise(&mut self, ctx: &AdvisoryContext) -> Advice;
}

/// Default: never has an opinion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdvisor;

impl Advisor for NoAdvisor {
    fn advise(&mut self, _ctx: &AdvisoryContext) -> Advice {
        Advice::NoOpinion
    }
}

/// Interpret a free-form advisor reply. The first `{` to the last `}` is
/// parsed as JSON and its boolean `decision` (or `immediate_response`) read.
pub fn parse_advice(response: &str) -> Advice {
    let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) else {
        return Advice::NoOpinion;
    };
    if end < start {
        return Advice::NoOpinion;
    }
    let Ok(value) = serde_json::from_str::<Value>(&response[start..=end]) else {
        return Advice::NoOpinion;
    };
    let decision = value
        .get("decision")
        .or_else(|| value.get("immediate_response"))
        .and_then(Value::as_bool);
    match decision {
        Some(true) => Advice::Pursue,
        Some(false) => Advice::Skip,
        None => Advice::NoOpinion,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        assert_eq!(
            parse_advice(r#"{"decision": true, "confidence": "high", "reason": "rare"}"#),
            Advice::Pursue
        );
        assert_eq!(parse_advice(r#"{"decision": false}"#), Advice::Skip);
    }

    #[test]
    fn test_parse_embedded_json() {
        let reply = "Sure, here is my answer:\n```json\n{\"immediate_response\": true}\n```";
        assert_eq!(parse_advice(reply), Advice::Pursue);
    }

    #[test]
    fn test_unparsable_is_no_opinion() {
        assert_eq!(parse_advice(""), Advice::NoOpinion);
        assert_eq!(parse_advice("yes, call them"), Advice::NoOpinion);
        assert_eq!(parse_advice("} nope {"), Advice::NoOpinion);
        assert_eq!(parse_advice(r#"{"decision": "maybe"}"#), Advice::NoOpinion);
        assert_eq!(parse_advice(r#"{"decision": tru"#), Advice::NoOpinion);
    }

    #[test]
    fn test_no_advisor() {
        let ctx = AdvisoryContext {
            call: "JA1XYZ".into(),
            dxcc_id: DxccId(339),
            entity: "Japan".into(),
            band: Some(Band::M20),
            mode: "FT8".into(),
            snr_db: -10,
            tier: Tier::NewBand,
            whitelisted: false,
            worked_entities: 120,
            worked_on_band: false,
        };
        assert_eq!(NoAdvisor.advise(&ctx), Advice::NoOpinion);
    }
}
