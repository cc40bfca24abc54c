//! Decoded message text → typed exchange.
//!
//! Standard messages are two or three tokens: `CQ K1ABC FN42`,
//! `LU9DCE K1ABC -12`, `K1ABC JA1XYZ RR73`, or a bare `CQ 3XY3D`.
//! Four tokens are either a directed call, whose modifier after `CQ` is
//! dropped (`CQ DX K1ABC FN42`), or an exchange with a two-part report
//! (`K1ABC JA1XYZ R 2A`), whose last two tokens are kept together.
//! After that, the sending station is always the second token.

use serde::Serialize;

/// Final acknowledgment / sign-off tokens.
pub const SIGN_OFFS: &[&str] = &["73", "RR73", "RRR"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// `CQ`, or the call being addressed.
    pub first: String,
    /// The transmitting station.
    pub call: String,
    /// Grid, report or sign-off. Absent on two-token messages.
    pub last: Option<String>,
}

impl Exchange {
    /// Parse message text. Anything not shaped like a standard exchange
    /// (free text, telemetry, one token, five or more) yields `None`.
    pub fn parse(message: &str) -> Option<Exchange> {
        let mut tokens: Vec<String> = message
            .split_whitespace()
            .map(|t| t.to_ascii_uppercase())
            .collect();
        if tokens.len() == 4 {
            if tokens[0] == "CQ" {
                tokens.remove(1);
            } else {
                let report = tokens.split_off(2).join(" ");
                tokens.push(report);
            }
        }
        let mut tokens = tokens.into_iter();
        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(first), Some(call), last, None) => Some(Exchange { first, call, last }),
            _ => None,
        }
    }

    pub fn is_cq(&self) -> bool {
        self.first == "CQ"
    }

    pub fn is_sign_off(&self) -> bool {
        self.last
            .as_deref()
            .is_some_and(|l| SIGN_OFFS.contains(&l))
    }

    /// The final `73` that closes a contact.
    pub fn is_final_73(&self) -> bool {
        self.last.as_deref() == Some("73")
    }

    pub fn is_addressed_to(&self, own_call: &str) -> bool {
        !own_call.is_empty() && self.first.eq_ignore_ascii_case(own_call)
    }

    pub fn is_from(&self, call: &str) -> bool {
        self.call.eq_ignore_ascii_case(call)
    }

    /// Whether this exchange opens a contact this station may answer.
    pub fn qualifies(&self, own_call: &str) -> bool {
        if !own_call.is_empty() && self.is_from(own_call) {
            return false;
        }
        self.is_cq() || self.is_addressed_to(own_call) || self.is_sign_off()
    }
}
