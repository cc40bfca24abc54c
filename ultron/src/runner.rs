//! The pursuit loop: WSJT-X datagrams in, commands out.
//!
//! One task, one socket. Each datagram is relayed, decoded and run through
//! the session to completion before the next receive. Commands go back to
//! whoever sent the last well-formed datagram, each from a fresh socket.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;

use ultron_core::config::Config;
use ultron_core::logbook::Logbook;
use ultron_core::pursuit::{Action, DecodeReport};
use ultron_core::store::{WhitelistStore, WorkedCache, WorkedCacheEntry};
use ultron_core::types::mode_name;
use ultron_core::{decode, Band, Command, Message, PrefixTable, Resolver, Session};

/// Largest datagram we expect from the radio software.
const MAX_DATAGRAM: usize = 65_536;

struct Runner {
    session: Session,
    logbook: Logbook,
    whitelists: WhitelistStore,
    worked_cache: WorkedCache,
    priority_bands: Vec<Band>,
    /// Source of the last well-formed datagram.
    reply_to: Option<SocketAddr>,
}

/// Load state from disk, bind the socket and run until Ctrl-C.
pub async fn run(config: Config) -> Result<()> {
    let mut runner = Runner::load(&config)?;

    let listen = format!("{}:{}", config.network.listen_host, config.network.listen_port);
    let socket = UdpSocket::bind(&listen)
        .await
        .with_context(|| format!("cannot bind udp://{listen}"))?;
    let relay = match config.network.relay.as_deref() {
        Some(target) => open_relay(target).await,
        None => None,
    };

    eprintln!("ULTRON listening on udp://{listen}");
    if let Some((_, target)) = &relay {
        eprintln!("  relaying to udp://{target}");
    }
    eprintln!("  type `halt` to stop transmitting, `stats` for counters, Ctrl-C to quit");

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "receive failed");
                        continue;
                    }
                };
                let datagram = &buf[..len];
                if let Some((relay_socket, target)) = &relay {
                    if let Err(e) = relay_socket.send_to(datagram, target).await {
                        tracing::debug!(%target, error = %e, "relay send failed");
                    }
                }
                runner.on_datagram(datagram, src).await;
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => runner.on_operator_line(line.trim()).await,
                    Ok(None) | Err(_) => stdin_open = false,
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("interrupted, halting transmission");
                let actions = runner.session.operator_halt(Utc::now());
                runner.perform(actions).await;
                runner.log_stats();
                return Ok(());
            }
        }
    }
}

/// A socket for forwarding. An unusable relay address disables relaying.
async fn open_relay(target: &str) -> Option<(UdpSocket, SocketAddr)> {
    let target: SocketAddr = match target.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::warn!(relay = target, error = %e, "bad relay address, relaying disabled");
            return None;
        }
    };
    match UdpSocket::bind(unspecified_for(target)).await {
        Ok(socket) => Some((socket, target)),
        Err(e) => {
            tracing::warn!(%target, error = %e, "relay socket unavailable, relaying disabled");
            None
        }
    }
}

fn unspecified_for(target: SocketAddr) -> SocketAddr {
    if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    }
}

impl Runner {
    fn load(config: &Config) -> Result<Self> {
        let paths = &config.paths;
        let table = PrefixTable::load(&paths.reference_table).with_context(|| {
            format!("cannot load reference table {}", paths.reference_table.display())
        })?;
        let mut session = Session::new(config.engine.clone(), Resolver::new(table));

        let logbook = Logbook::open(&paths.log_file).unwrap_or_else(|e| {
            tracing::warn!(path = %paths.log_file.display(), error = %e, "contact log unavailable");
            Logbook::new(&paths.log_file)
        });
        match logbook.scan() {
            Ok(records) => {
                let used = session.seed_from_log(&records);
                tracing::info!(records = records.len(), used, "contact log scanned");
            }
            Err(e) => {
                tracing::warn!(path = %logbook.path().display(), error = %e, "contact log scan failed");
            }
        }

        let worked_cache = WorkedCache::new(&paths.worked_cache);
        match worked_cache.seed(&mut session.engine_mut().worked) {
            Ok(merged) => tracing::info!(merged, "worked cache loaded"),
            Err(e) => {
                tracing::warn!(path = %worked_cache.path().display(), error = %e, "worked cache unreadable");
            }
        }

        let whitelists = WhitelistStore::new(&paths.whitelist_dir);
        let priority_bands = config.engine.priority_bands.clone();
        whitelists.reload_into(&mut session.engine_mut().whitelists, &priority_bands);

        let engine = session.engine();
        tracing::info!(
            mode = if config.engine.whitelist_only_mode { "whitelist-only" } else { "prefer-whitelist" },
            worked_entities = engine.worked.entity_count(),
            worked_band_pairs = engine.worked.band_pairs(),
            whitelisted = engine.whitelists.len(),
            "engine ready"
        );

        Ok(Runner {
            session,
            logbook,
            whitelists,
            worked_cache,
            priority_bands,
            reply_to: None,
        })
    }

    async fn on_datagram(&mut self, datagram: &[u8], src: SocketAddr) {
        let msg = match decode(datagram) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(%src, len = datagram.len(), error = %e, "malformed datagram dropped");
                return;
            }
        };
        self.reply_to = Some(src);

        if matches!(msg, Message::Heartbeat(_)) {
            self.whitelists
                .reload_into(&mut self.session.engine_mut().whitelists, &self.priority_bands);
        }

        let actions = self.session.handle(&msg, Utc::now());
        self.perform(actions).await;
    }

    async fn on_operator_line(&mut self, line: &str) {
        match line.to_ascii_lowercase().as_str() {
            "" => {}
            "halt" => {
                let actions = self.session.operator_halt(Utc::now());
                self.perform(actions).await;
            }
            "stats" => self.log_stats(),
            other => eprintln!("unknown command `{other}` (try `halt` or `stats`)"),
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(command) => self.send(&command).await,
                Action::AppendLog(record) => {
                    if let Err(e) = self.logbook.append(&record) {
                        tracing::warn!(path = %self.logbook.path().display(), error = %e, "log append failed");
                    }
                }
                Action::RecordWorked {
                    entity_name,
                    record,
                    new_entity,
                } => {
                    if !new_entity {
                        continue;
                    }
                    let id = record.dxcc_id;
                    match self
                        .worked_cache
                        .record(id, WorkedCacheEntry::new(&entity_name, &record))
                    {
                        Ok(true) => tracing::info!(dxcc = %id, entity = %entity_name, "worked cache updated"),
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(path = %self.worked_cache.path().display(), error = %e, "worked cache write failed");
                        }
                    }
                }
                Action::Alert(alert) => tracing::warn!(event = alert.event_type(), "{alert}"),
                Action::Decoded(report) => tracing::info!("{}", display_line(&report)),
                Action::Transition {
                    from,
                    to,
                    call,
                    reason,
                } => tracing::info!(%from, %to, call = %call, reason, "pursuit"),
            }
        }
    }

    async fn send(&self, command: &Command) {
        let Some(dest) = self.reply_to else {
            tracing::warn!(?command, "no radio software heard yet, command dropped");
            return;
        };
        let bytes = command.encode();
        let sent: std::io::Result<usize> = async {
            let socket = UdpSocket::bind(unspecified_for(dest)).await?;
            socket.send_to(&bytes, dest).await
        }
        .await;
        match sent {
            Ok(_) => tracing::debug!(%dest, command = command_name(command), "command sent"),
            Err(e) => tracing::warn!(%dest, command = command_name(command), error = %e, "command send failed"),
        }
    }

    fn log_stats(&self) {
        let stats = self.session.stats();
        tracing::info!(
            phase = %self.session.phase(),
            decodes = stats.decodes,
            replies = stats.replies_sent,
            timeouts = stats.timeouts,
            contacts = stats.contacts_total,
            today = stats.contacts_today,
            excluded = self.session.exclusions().len(),
            worked_entities = self.session.engine().worked.entity_count(),
            "session stats"
        );
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Reply(_) => "reply",
        Command::HaltTx(_) => "halt-tx",
    }
}

/// Operator display: time, SNR, Δf, mode, tag, message, entity, band.
fn display_line(report: &DecodeReport) -> String {
    let event = &report.event;
    let mut line = format!(
        "{} {:>3} {:>5} {:<6} {} {:<24} {} [{}]",
        report.time,
        event.snr_db,
        event.delta_frequency_hz,
        mode_name(&event.mode),
        report.tag,
        event.raw_message,
        report.entity.as_deref().unwrap_or("?"),
        event.band.map_or("?", |b| b.as_str()),
    );
    let annotations = report.annotations();
    if !annotations.is_empty() {
        line.push(' ');
        line.push_str(&annotations);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use ultron_core::priority::{Tag, Tier};
    use ultron_core::types::{DecodeEvent, DxccId};

    fn report(whitelisted: bool, new_entity: bool) -> DecodeReport {
        DecodeReport {
            event: DecodeEvent {
                time_ms: 32_415_000,
                snr_db: -9,
                delta_frequency_hz: 1120,
                mode: "~".into(),
                raw_message: "CQ 3XY3D".into(),
                frequency_hz: Some(14_074_000),
                band: Some(Band::M20),
            },
            time: "090015".into(),
            tag: Tag::Pursue,
            call: Some("3XY3D".into()),
            entity: Some("Fictional".into()),
            dxcc_id: Some(DxccId(1)),
            tier: Some(Tier::NewDxcc),
            whitelisted,
            new_entity,
        }
    }

    #[test]
    fn test_display_line() {
        let line = display_line(&report(false, false));
        assert!(line.starts_with("090015  -9  1120 FT8    >> CQ 3XY3D"), "got {line:?}");
        assert!(line.ends_with("Fictional [20m]"), "got {line:?}");
    }

    #[test]
    fn test_display_line_annotations() {
        let line = display_line(&report(true, true));
        assert!(line.ends_with("[20m] [WHITELIST] [NEW DXCC ACTIVITY]"), "got {line:?}");
    }

    const TABLE: &str = r#"[
        {"id": 339, "flag": "jp", "name": "Japan", "licencia": "Japan JA"},
        {"id": 291, "flag": "us", "name": "United States", "licencia": "UnitedStates K W N"}
    ]"#;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.paths.reference_table = dir.join("base.json");
        config.paths.log_file = dir.join("logs/wsjtx_log.adi");
        config.paths.whitelist_dir = dir.to_path_buf();
        config.paths.worked_cache = dir.join("dxcc_worked_cache.json");
        config
    }

    #[test]
    fn test_load_seeds_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.paths.reference_table, TABLE).unwrap();
        std::fs::create_dir_all(dir.path().join("logs")).unwrap();
        std::fs::write(
            &config.paths.log_file,
            "<EOH>\n<CALL:6>JA1XYZ <BAND:3>20m <MODE:3>FT8 <EOR>\n",
        )
        .unwrap();
        std::fs::write(
            &config.paths.worked_cache,
            r#"{"291": {"name": "United States", "first_worked": "2024-06-01 00:00:00", "band": "40m", "call": "K1ABC"}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("dxcc_whitelist_global.json"),
            r#"{"1": {"name": "Fictional", "priority": "high"}}"#,
        )
        .unwrap();

        let runner = Runner::load(&config).unwrap();
        let worked = &runner.session.engine().worked;
        assert!(worked.is_worked_on(DxccId(339), Band::M20), "from the contact log");
        assert!(worked.is_worked_on(DxccId(291), Band::M40), "from the worked cache");
        assert!(runner.session.engine().whitelists.in_global(DxccId(1)));
        assert_eq!(runner.reply_to, None);
    }

    #[test]
    fn test_load_creates_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.paths.reference_table, TABLE).unwrap();

        let runner = Runner::load(&config).unwrap();
        assert!(config.paths.log_file.exists());
        assert_eq!(runner.session.engine().worked.entity_count(), 0);
    }

    #[test]
    fn test_load_without_reference_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Runner::load(&config_in(dir.path())).err().expect("missing table is fatal");
        assert!(err.to_string().contains("reference table"), "got {err}");
    }

    #[test]
    fn test_unspecified_matches_family() {
        let v4: SocketAddr = "127.0.0.1:2237".parse().unwrap();
        let v6: SocketAddr = "[::1]:2237".parse().unwrap();
        assert!(unspecified_for(v4).is_ipv4());
        assert!(unspecified_for(v6).is_ipv6());
        assert_eq!(unspecified_for(v4).port(), 0);
    }
}
