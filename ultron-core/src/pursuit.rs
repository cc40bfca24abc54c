//! Contact-pursuit state machine.
//!
//! Pure logic: no sockets, no files. Call `handle()` with each decoded
//! datagram and perform the returned `Action`s in order: send commands,
//! append log records, persist worked entities, deliver alerts.
//!
//! Phases:
//! - `Idle`           — listening for a station worth answering
//! - `TargetAcquired` — a candidate passed the engine (transient)
//! - `Transmitting`   — reply sent, waiting for the final 73
//! - `Confirmed`      — contact complete (transient)
//!
//! Events are dispatched on (phase, message kind) in one explicit match.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::Serialize;

use crate::adif::AdifRecord;
use crate::advisor::{Advice, Advisor, AdvisoryContext, NoAdvisor};
use crate::alert::{ActivityMonitor, Alert};
use crate::config::EngineConfig;
use crate::dxcc::{DxccEntity, Resolver};
use crate::encode::{encode_halt, encode_reply};
use crate::exchange::Exchange;
use crate::priority::{
    Assessment, ExclusionSet, PriorityEngine, Tag, Tier, Veto, WhitelistMode, WorkedRecord,
};
use crate::types::*;

/// Software id used for Halt TX before any datagram has named one.
pub const DEFAULT_SOFTWARE_ID: &str = "WSJT-X";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    TargetAcquired,
    Transmitting,
    Confirmed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "idle",
            Phase::TargetAcquired => "target-acquired",
            Phase::Transmitting => "transmitting",
            Phase::Confirmed => "confirmed",
        })
    }
}

/// The station currently being worked.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub call: String,
    pub entity: DxccEntity,
    pub tier: Tier,
    pub band: Option<Band>,
    pub frequency_hz: Option<u64>,
    pub reply: Reply,
    pub sent_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub phase: Phase,
    pub target: Option<Target>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            phase: Phase::Idle,
            target: None,
        }
    }
}

/// Per-run counters. `contacts_today` resets at 00:00 UTC.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub decodes: u64,
    pub replies_sent: u64,
    pub timeouts: u64,
    pub contacts_total: u64,
    pub contacts_today: u64,
    day: Option<NaiveDate>,
}

impl SessionStats {
    fn roll(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            if self.day.is_some() {
                self.contacts_today = 0;
            }
            self.day = Some(today);
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Outbound protocol command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Command {
    Reply(Reply),
    HaltTx(HaltTx),
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::Reply(r) => encode_reply(r),
            Command::HaltTx(h) => encode_halt(h),
        }
    }
}

/// Operator display line for one decode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeReport {
    pub event: DecodeEvent,
    /// `HHMMSS`.
    pub time: String,
    pub tag: Tag,
    pub call: Option<String>,
    pub entity: Option<String>,
    pub dxcc_id: Option<DxccId>,
    pub tier: Option<Tier>,
    pub whitelisted: bool,
    pub new_entity: bool,
}

impl DecodeReport {
    /// `[WHITELIST]` / `[NEW DXCC ACTIVITY]` annotations.
    pub fn annotations(&self) -> String {
        let mut out = Vec::new();
        if self.whitelisted {
            out.push("[WHITELIST]");
        }
        if self.new_entity {
            out.push("[NEW DXCC ACTIVITY]");
        }
        out.join(" ")
    }
}

/// Work for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send(Command),
    AppendLog(AdifRecord),
    /// A contact was credited. `new_entity` means the worked cache needs it.
    RecordWorked {
        entity_name: String,
        record: WorkedRecord,
        new_entity: bool,
    },
    Alert(Alert),
    Decoded(DecodeReport),
    Transition {
        from: Phase,
        to: Phase,
        call: String,
        reason: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Everything the pursuit loop remembers between events.
pub struct Session {
    config: EngineConfig,
    resolver: Resolver,
    engine: PriorityEngine,
    exclusions: ExclusionSet,
    monitor: ActivityMonitor,
    advisor: Box<dyn Advisor + Send>,
    state: SessionState,
    status: Option<Status>,
    software_id: String,
    /// (call, band) pairs appended to the log this run.
    logged: HashSet<(String, Option<Band>)>,
    stats: SessionStats,
}

impl Session {
    pub fn new(config: EngineConfig, resolver: Resolver) -> Self {
        let engine = PriorityEngine::new(
            WhitelistMode::from_flag(config.whitelist_only_mode),
            config.low_snr_threshold_db,
        );
        let monitor = ActivityMonitor::new(config.notification_cooldown_seconds);
        Session {
            config,
            resolver,
            engine,
            exclusions: ExclusionSet::default(),
            monitor,
            advisor: Box::new(NoAdvisor),
            state: SessionState::default(),
            status: None,
            software_id: DEFAULT_SOFTWARE_ID.to_string(),
            logged: HashSet::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn with_advisor(mut self, advisor: Box<dyn Advisor + Send>) -> Self {
        self.advisor = advisor;
        self
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn engine(&self) -> &PriorityEngine {
        &self.engine
    }

    /// Whitelists and worked sets, for seeding and reloads.
    pub fn engine_mut(&mut self) -> &mut PriorityEngine {
        &mut self.engine
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// Own call from the last Status; empty until one arrives.
    pub fn own_call(&self) -> &str {
        self.status.as_ref().map_or("", |s| s.de_call.trim())
    }

    pub fn band(&self) -> Option<Band> {
        self.status.as_ref().and_then(Status::band)
    }

    /// Seed worked sets from the contact log. Returns records used.
    pub fn seed_from_log(&mut self, records: &[AdifRecord]) -> usize {
        self.engine.worked.seed_from_log(records, &mut self.resolver)
    }

    /// Feed one decoded datagram.
    pub fn handle(&mut self, msg: &Message, now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(id) = msg.id().filter(|id| !id.is_empty()) {
            if id != self.software_id {
                self.software_id = id.to_string();
            }
        }
        self.stats.roll(now.date_naive());

        match (self.state.phase, msg) {
            (_, Message::Heartbeat(_)) => self.on_heartbeat(now, &mut actions),
            (_, Message::Status(status)) => self.on_status(status, &mut actions),
            (Phase::Idle, Message::Decode(decode)) => {
                self.on_decode_idle(decode, now, &mut actions)
            }
            (Phase::Transmitting, Message::Decode(decode)) => {
                self.on_decode_transmitting(decode, now, &mut actions)
            }
            // Transient phases never persist across events.
            (Phase::TargetAcquired | Phase::Confirmed, Message::Decode(decode)) => {
                self.evaluate(decode, now, &mut actions);
            }
            (_, Message::LoggedAdif(logged)) => self.on_logged_adif(logged, now, &mut actions),
            (_, Message::Reply(_) | Message::HaltTx(_) | Message::Unrecognized { .. }) => {}
        }
        actions
    }

    /// External halt request: always emits Halt TX, abandons any target.
    pub fn operator_halt(&mut self, _now: DateTime<Utc>) -> Vec<Action> {
        let mut actions = vec![self.halt()];
        if let Some(target) = self.state.target.take() {
            actions.push(Action::Transition {
                from: self.state.phase,
                to: Phase::Idle,
                call: target.call,
                reason: "operator halt",
            });
        }
        self.state.phase = Phase::Idle;
        actions
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn on_heartbeat(&mut self, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let cleared = self.exclusions.len();
        if self.exclusions.clear_at_boundary(now) && cleared > 0 {
            tracing::info!(cleared, "exclusion list cleared");
        }

        if self.state.phase != Phase::Transmitting {
            return;
        }
        let expired = self
            .state
            .target
            .as_ref()
            .is_some_and(|t| now > t.deadline);
        if !expired {
            return;
        }
        if let Some(target) = self.state.target.take() {
            self.exclusions.insert(&target.call);
            self.stats.timeouts += 1;
            actions.push(self.halt());
            actions.push(Action::Transition {
                from: Phase::Transmitting,
                to: Phase::Idle,
                call: target.call,
                reason: "no response",
            });
        }
        self.state.phase = Phase::Idle;
    }

    fn on_status(&mut self, status: &Status, actions: &mut Vec<Action>) {
        self.status = Some(status.clone());
        if self.state.phase == Phase::Idle && status.tx_enabled && self.config.halt_unsolicited_tx {
            tracing::info!("transmitter enabled while idle, halting");
            actions.push(self.halt());
        }
    }

    fn on_decode_idle(&mut self, decode: &Decode, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let Some(candidate) = self.evaluate(decode, now, actions) else {
            return;
        };
        if !self.consult_advisor(&candidate, decode) {
            self.retag(actions, Tag::Skip);
            return;
        }
        self.retag(actions, candidate.assessment.tag().max_pursuable());

        let from = self.state.phase;
        self.state.phase = Phase::TargetAcquired;
        actions.push(Action::Transition {
            from,
            to: Phase::TargetAcquired,
            call: candidate.call.clone(),
            reason: candidate.assessment.tier.as_str(),
        });

        let reply = Reply::from_decode(decode);
        let timeout = TimeDelta::seconds(self.config.response_timeout_seconds.min(86_400) as i64);
        actions.push(Action::Send(Command::Reply(reply.clone())));
        self.stats.replies_sent += 1;
        self.state.target = Some(Target {
            call: candidate.call.clone(),
            entity: candidate.entity,
            tier: candidate.assessment.tier,
            band: self.band(),
            frequency_hz: self.status.as_ref().map(|s| s.dial_frequency_hz),
            reply,
            sent_at: now,
            deadline: now + timeout,
        });
        self.state.phase = Phase::Transmitting;
        actions.push(Action::Transition {
            from: Phase::TargetAcquired,
            to: Phase::Transmitting,
            call: candidate.call,
            reason: "reply sent",
        });
    }

    fn on_decode_transmitting(
        &mut self,
        decode: &Decode,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        self.evaluate(decode, now, actions);

        let Some(exchange) = Exchange::parse(&decode.message) else {
            return;
        };
        let Some(target_call) = self.state.target.as_ref().map(|t| t.call.clone()) else {
            return;
        };
        if !exchange.is_from(&target_call) {
            return;
        }

        let own = self.own_call().to_string();
        if exchange.is_addressed_to(&own) {
            if exchange.is_final_73() {
                self.confirm(now, true, actions);
            }
            return;
        }
        if !exchange.is_cq() && !exchange.is_sign_off() {
            // Target answered someone else.
            actions.push(self.halt());
            actions.push(Action::Transition {
                from: Phase::Transmitting,
                to: Phase::Idle,
                call: target_call,
                reason: "busy",
            });
            self.state = SessionState::default();
        }
    }

    fn on_logged_adif(&mut self, logged: &LoggedAdif, now: DateTime<Utc>, actions: &mut Vec<Action>) {
        let record = &logged.record;
        let Some(call) = record.call().map(str::to_ascii_uppercase) else {
            tracing::debug!("logged contact without call ignored");
            return;
        };
        let band = record.band().or_else(|| self.band());
        let key = (call.clone(), band);
        if self.logged.contains(&key) {
            tracing::debug!(call = %call, "contact already logged this session");
            return;
        }
        self.logged.insert(key);
        actions.push(Action::AppendLog(record.clone()));

        let completes_target = self.state.phase == Phase::Transmitting
            && self
                .state
                .target
                .as_ref()
                .is_some_and(|t| t.call.eq_ignore_ascii_case(&call));
        if completes_target {
            self.confirm(now, false, actions);
            return;
        }

        let entity = self.resolver.resolve(&call).cloned();
        let (dxcc_id, entity_name) = match (&entity, record.dxcc()) {
            (Some(e), _) => (e.id, e.name.clone()),
            (None, Some(id)) => (id, record.country().unwrap_or_default().to_string()),
            (None, None) => {
                tracing::debug!(call = %call, "logged contact with unknown entity");
                return;
            }
        };
        self.credit(dxcc_id, &entity_name, &call, band, now, actions);
        self.stats.contacts_total += 1;
        self.stats.contacts_today += 1;
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Build the display line for a decode and, when the exchange is one
    /// this station may answer, return the candidate it names.
    fn evaluate(
        &mut self,
        decode: &Decode,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) -> Option<Candidate> {
        self.stats.decodes += 1;
        let band = self.band();
        let event = DecodeEvent {
            time_ms: decode.time_ms,
            snr_db: decode.snr_db,
            delta_frequency_hz: decode.delta_frequency_hz,
            mode: mode_name(&decode.mode).to_string(),
            raw_message: decode.message.clone(),
            frequency_hz: self.status.as_ref().map(|s| s.dial_frequency_hz),
            band,
        };
        let mut report = DecodeReport {
            event,
            time: decode.time_hhmmss(),
            tag: Tag::Chatter,
            call: None,
            entity: None,
            dxcc_id: None,
            tier: None,
            whitelisted: false,
            new_entity: false,
        };

        let Some(exchange) = Exchange::parse(&decode.message) else {
            actions.push(Action::Decoded(report));
            return None;
        };
        let own = self.own_call().to_string();
        let call = exchange.call.clone();
        let entity = self.resolver.resolve(&call).cloned();
        let assessment =
            self.engine
                .assess(&call, entity.as_ref(), band, decode.snr_db, &self.exclusions);

        report.call = Some(call.clone());
        report.whitelisted = assessment.whitelisted;
        if let Some(e) = &entity {
            report.entity = Some(e.name.clone());
            report.dxcc_id = Some(e.id);
            report.tier = Some(assessment.tier);
            report.new_entity = !self.engine.worked.is_worked(e.id);
        }

        let on_air = assessment.veto != Some(Veto::BadCallsign) && !call.eq_ignore_ascii_case(&own);
        if let (Some(e), true) = (&entity, on_air && report.new_entity) {
            if let Some(alert) = self.monitor.check(e, &call, band, decode.snr_db, now) {
                actions.push(Action::Alert(alert));
            }
        }

        let qualifies = exchange.qualifies(&own);
        if qualifies {
            report.tag = assessment.tag();
        }
        actions.push(Action::Decoded(report));

        if !qualifies || self.state.phase != Phase::Idle {
            return None;
        }
        if own.is_empty() {
            // Answers could not be recognized as ours.
            tracing::debug!(call = %call, "own call unknown until a status arrives");
            return None;
        }
        let entity = entity?;
        if assessment.veto.is_some() {
            return None;
        }
        Some(Candidate {
            call,
            entity,
            assessment,
            mode: mode_name(&decode.mode).to_string(),
        })
    }

    /// Final pursue/skip after the advisor has had its say.
    fn consult_advisor(&mut self, candidate: &Candidate, decode: &Decode) -> bool {
        let band = self.band();
        let ctx = AdvisoryContext {
            call: candidate.call.clone(),
            dxcc_id: candidate.entity.id,
            entity: candidate.entity.name.clone(),
            band,
            mode: candidate.mode.clone(),
            snr_db: decode.snr_db,
            tier: candidate.assessment.tier,
            whitelisted: candidate.assessment.whitelisted,
            worked_entities: self.engine.worked.entity_count(),
            worked_on_band: band.is_some_and(|b| self.engine.worked.is_worked_on(candidate.entity.id, b)),
        };
        match self.advisor.advise(&ctx) {
            Advice::NoOpinion => candidate.assessment.pursue(),
            Advice::Pursue => {
                if !candidate.assessment.pursue() {
                    tracing::info!(call = %candidate.call, "advisor promoted candidate");
                }
                true
            }
            Advice::Skip => {
                if candidate.assessment.pursue() {
                    tracing::info!(call = %candidate.call, "advisor vetoed candidate");
                }
                false
            }
        }
    }

    /// Replace the tag of the most recent display line.
    fn retag(&self, actions: &mut [Action], tag: Tag) {
        if let Some(Action::Decoded(report)) = actions
            .iter_mut()
            .rev()
            .find(|a| matches!(a, Action::Decoded(_)))
        {
            report.tag = tag;
        }
    }

    fn halt(&self) -> Action {
        Action::Send(Command::HaltTx(HaltTx::new(&self.software_id)))
    }

    /// Transmitting → Confirmed → Idle. `append` writes a synthesized log
    /// record; it is false when the radio software already logged it.
    fn confirm(&mut self, now: DateTime<Utc>, append: bool, actions: &mut Vec<Action>) {
        let Some(target) = self.state.target.take() else {
            self.state.phase = Phase::Idle;
            return;
        };
        actions.push(self.halt());
        self.state.phase = Phase::Confirmed;
        actions.push(Action::Transition {
            from: Phase::Transmitting,
            to: Phase::Confirmed,
            call: target.call.clone(),
            reason: "73 received",
        });

        if append {
            let record = contact_record(&target, now);
            self.logged.insert((target.call.clone(), target.band));
            actions.push(Action::AppendLog(record));
        }
        self.credit(target.entity.id, &target.entity.name, &target.call, target.band, now, actions);
        self.stats.contacts_total += 1;
        self.stats.contacts_today += 1;

        self.state.phase = Phase::Idle;
        actions.push(Action::Transition {
            from: Phase::Confirmed,
            to: Phase::Idle,
            call: target.call,
            reason: "contact logged",
        });
    }

    /// Mark an entity worked and announce it if it was new.
    fn credit(
        &mut self,
        dxcc_id: DxccId,
        entity_name: &str,
        call: &str,
        band: Option<Band>,
        now: DateTime<Utc>,
        actions: &mut Vec<Action>,
    ) {
        let record = WorkedRecord {
            dxcc_id,
            band,
            callsign: call.to_string(),
            first_worked_at: Some(now),
        };
        let new_entity = self.engine.worked.mark(record.clone());
        if new_entity {
            self.monitor.clear(dxcc_id);
            actions.push(Action::Alert(Alert::NewEntityWorked {
                dxcc_id,
                entity: entity_name.to_string(),
                call: call.to_string(),
                band,
                at: now,
            }));
        }
        actions.push(Action::RecordWorked {
            entity_name: entity_name.to_string(),
            record,
            new_entity,
        });
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("exclusions", &self.exclusions.len())
            .finish_non_exhaustive()
    }
}

struct Candidate {
    call: String,
    entity: DxccEntity,
    assessment: Assessment,
    mode: String,
}

impl Tag {
    /// `Lo` stays `Lo`; every other pursued line shows `>>`.
    fn max_pursuable(self) -> Tag {
        match self {
            Tag::LowSnr => Tag::LowSnr,
            _ => Tag::Pursue,
        }
    }
}

/// Log record for a contact the robot completed itself.
fn contact_record(target: &Target, now: DateTime<Utc>) -> AdifRecord {
    let mut record = AdifRecord::new();
    record.set("call", target.call.clone());
    if let Some(band) = target.band {
        record.set("band", band.as_str());
    }
    record.set("mode", mode_name(&target.reply.mode));
    record.set("qso_date", now.format("%Y%m%d").to_string());
    record.set("time_on", now.format("%H%M%S").to_string());
    record.set("dxcc", target.entity.id.to_string());
    record.set("country", target.entity.name.clone());
    if let Some(hz) = target.frequency_hz {
        let offset = i64::from(target.reply.delta_frequency_hz.max(0));
        let mhz = (hz as f64 + offset as f64) / 1_000_000.0;
        record.set("freq", format!("{mhz:.6}"));
    }
    record
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
