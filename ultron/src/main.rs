//! ultron: DXCC auto-responder for WSJT-X style radio software.

use std::collections::BTreeMap;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};

use ultron_core::config::{self, Config, PathsConfig};
use ultron_core::frame::hex_decode;
use ultron_core::logbook::Logbook;
use ultron_core::priority::{is_valid_callsign, WorkedSets};
use ultron_core::{decode, Band, PrefixTable, Resolver};

mod logging;
mod runner;

#[derive(Parser)]
#[command(name = "ultron", version, about = "DXCC auto-responder for WSJT-X")]
struct Cli {
    /// Config file (default: ~/.ultron/config.json)
    #[arg(long, global = true, env = "ULTRON_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (malformed packets, exclusions, reloads)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for WSJT-X datagrams and chase new DXCC entities
    Run {
        #[command(flatten)]
        paths: PathArgs,

        /// Address to bind
        #[arg(long, env = "ULTRON_HOST")]
        host: Option<String>,

        /// UDP port the radio software reports to
        #[arg(short, long, env = "ULTRON_PORT")]
        port: Option<u16>,

        /// Forward every datagram to this host:port
        #[arg(long, env = "ULTRON_RELAY", conflicts_with = "no_relay")]
        relay: Option<String>,

        /// Do not forward datagrams
        #[arg(long)]
        no_relay: bool,

        /// Only chase new entities and whitelisted entities
        #[arg(long)]
        whitelist_only: bool,

        /// Bands whose whitelist files are loaded, e.g. 20m,40m
        #[arg(long, value_delimiter = ',')]
        bands: Option<Vec<Band>>,
    },

    /// Resolve call signs to DXCC entities
    Resolve {
        /// Call signs to look up
        #[arg(required = true)]
        calls: Vec<String>,

        #[command(flatten)]
        paths: PathArgs,
    },

    /// Show worked entities per band from the contact log
    LogStats {
        #[command(flatten)]
        paths: PathArgs,

        /// List every worked entity with its first contact
        #[arg(short, long)]
        entities: bool,
    },

    /// Decode hex-dumped datagrams (one per line, "-" for stdin)
    Decode {
        /// Path to file containing hex datagrams
        file: PathBuf,

        /// Print each message as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        write: bool,
    },
}

/// File locations shared by several subcommands. Each overrides the config.
#[derive(Args, Default)]
struct PathArgs {
    /// Contact log
    #[arg(long, env = "ULTRON_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// DXCC reference table (JSON)
    #[arg(long, env = "ULTRON_REFERENCE")]
    reference: Option<PathBuf>,

    /// Directory holding dxcc_whitelist_*.json
    #[arg(long, env = "ULTRON_WHITELIST_DIR")]
    whitelist_dir: Option<PathBuf>,

    /// Worked-entity cache file
    #[arg(long, env = "ULTRON_WORKED_CACHE")]
    worked_cache: Option<PathBuf>,
}

impl PathArgs {
    fn apply(self, paths: &mut PathsConfig) {
        if let Some(p) = self.log_file {
            paths.log_file = p;
        }
        if let Some(p) = self.reference {
            paths.reference_table = p;
        }
        if let Some(p) = self.whitelist_dir {
            paths.whitelist_dir = p;
        }
        if let Some(p) = self.worked_cache {
            paths.worked_cache = p;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config_path = cli.config.unwrap_or_else(config::config_file);
    let mut config = config::load_config_from(&config_path);

    match cli.command {
        Commands::Run {
            paths,
            host,
            port,
            relay,
            no_relay,
            whitelist_only,
            bands,
        } => {
            paths.apply(&mut config.paths);
            if let Some(host) = host {
                config.network.listen_host = host;
            }
            if let Some(port) = port {
                config.network.listen_port = port;
            }
            if relay.is_some() {
                config.network.relay = relay;
            }
            if no_relay {
                config.network.relay = None;
            }
            if whitelist_only {
                config.engine.whitelist_only_mode = true;
            }
            if let Some(bands) = bands {
                config.engine.priority_bands = bands;
            }
            cmd_run(config)
        }
        Commands::Resolve { calls, paths } => {
            paths.apply(&mut config.paths);
            cmd_resolve(&config, &calls)
        }
        Commands::LogStats { paths, entities } => {
            paths.apply(&mut config.paths);
            cmd_log_stats(&config, entities)
        }
        Commands::Decode { file, json } => cmd_decode(&file, json),
        Commands::Config { write } => cmd_config(&config, &config_path, write),
    }
}

fn cmd_run(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start runtime")?;
    runtime.block_on(runner::run(config))
}

fn load_table(path: &Path) -> Result<PrefixTable> {
    PrefixTable::load(path).with_context(|| format!("cannot load reference table {}", path.display()))
}

fn cmd_resolve(config: &Config, calls: &[String]) -> Result<()> {
    let mut resolver = Resolver::new(load_table(&config.paths.reference_table)?);

    let mut table = Table::new();
    table.set_header(vec!["Call", "Entity", "DXCC", "Flag", "Syntax"]);
    for call in calls {
        let call = call.trim().to_ascii_uppercase();
        let syntax = if is_valid_callsign(&call) { "ok" } else { "invalid" };
        let row = match resolver.resolve(&call) {
            Some(entity) => vec![
                Cell::new(&call),
                Cell::new(&entity.name),
                Cell::new(entity.id),
                Cell::new(&entity.flag),
                Cell::new(syntax),
            ],
            None => vec![
                Cell::new(&call),
                Cell::new("unknown"),
                Cell::new("-"),
                Cell::new("-"),
                Cell::new(syntax),
            ],
        };
        table.add_row(row);
    }
    println!("{table}");
    Ok(())
}

fn cmd_log_stats(config: &Config, list_entities: bool) -> Result<()> {
    let mut resolver = Resolver::new(load_table(&config.paths.reference_table)?);
    let log_path = &config.paths.log_file;
    let records = Logbook::new(log_path)
        .scan()
        .with_context(|| format!("cannot read contact log {}", log_path.display()))?;

    let mut worked = WorkedSets::default();
    let used = worked.seed_from_log(&records, &mut resolver);

    println!("Contact log: {}", log_path.display());
    println!("  Records:          {}", records.len());
    println!("  Credited:         {used}");
    println!("  Entities worked:  {}", worked.entity_count());
    println!("  Entity/band pairs: {}", worked.band_pairs());
    println!();

    let mut table = Table::new();
    table.set_header(vec!["Band", "Entities"]);
    for band in Band::ALL {
        let count = worked.worked_on_band(band);
        if count > 0 {
            table.add_row(vec![Cell::new(band), Cell::new(count)]);
        }
    }
    println!("{table}");

    if list_entities {
        let mut table = Table::new();
        table.set_header(vec!["DXCC", "Entity", "First call", "Band", "First worked"]);
        for entity in resolver.table().entities() {
            let Some(first) = worked.first_contact(entity.id) else {
                continue;
            };
            table.add_row(vec![
                Cell::new(entity.id),
                Cell::new(&entity.name),
                Cell::new(&first.callsign),
                Cell::new(first.band.map_or("?", |b| b.as_str())),
                Cell::new(
                    first
                        .first_worked_at
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_default(),
                ),
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

fn cmd_decode(file: &Path, json: bool) -> Result<()> {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(file).with_context(|| format!("cannot open {}", file.display()))?;
        Box::new(io::BufReader::new(f))
    };

    let mut by_kind: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut total = 0u64;
    let mut malformed = 0u64;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let hex = line.trim();
        if hex.is_empty() || hex.starts_with('#') {
            continue;
        }
        total += 1;

        let Some(bytes) = hex_decode(hex) else {
            malformed += 1;
            tracing::debug!(line = hex, "not a hex dump");
            continue;
        };
        match decode(&bytes) {
            Ok(msg) => {
                *by_kind.entry(msg.kind_name()).or_default() += 1;
                if json {
                    println!("{}", serde_json::to_string(&msg)?);
                } else {
                    println!("{msg:?}");
                }
            }
            Err(e) => {
                malformed += 1;
                tracing::debug!(error = %e, "malformed datagram");
            }
        }
    }

    let mut table = Table::new();
    table.set_header(vec!["Kind", "Count"]);
    for (kind, count) in &by_kind {
        table.add_row(vec![Cell::new(kind), Cell::new(count)]);
    }
    table.add_row(vec![Cell::new("malformed"), Cell::new(malformed)]);
    eprintln!("{table}");
    eprintln!("{total} datagrams, {malformed} malformed");
    Ok(())
}

fn cmd_config(config: &Config, path: &Path, write: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if write {
        let written = config::save_config_to(config, path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        eprintln!("Saved to {}", written.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "ultron",
            "run",
            "--port",
            "2238",
            "--no-relay",
            "--bands",
            "20m,40m",
            "--log-file",
            "/tmp/log.adi",
        ])
        .unwrap();
        let Commands::Run {
            port,
            no_relay,
            bands,
            paths,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(port, Some(2238));
        assert!(no_relay);
        assert_eq!(bands, Some(vec![Band::M20, Band::M40]));
        assert_eq!(paths.log_file, Some(PathBuf::from("/tmp/log.adi")));
    }

    #[test]
    fn test_cli_rejects_unknown_band() {
        assert!(Cli::try_parse_from(["ultron", "run", "--bands", "2m"]).is_err());
    }

    #[test]
    fn test_path_args_override_config() {
        let mut paths = PathsConfig::default();
        PathArgs {
            reference: Some("/data/base.json".into()),
            ..PathArgs::default()
        }
        .apply(&mut paths);
        assert_eq!(paths.reference_table, PathBuf::from("/data/base.json"));
        assert_eq!(paths.log_file, PathsConfig::default().log_file, "untouched");
    }

    #[test]
    fn test_resolve_requires_calls() {
        assert!(Cli::try_parse_from(["ultron", "resolve"]).is_err());
        assert!(Cli::try_parse_from(["ultron", "resolve", "JA1XYZ", "K1ABC"]).is_ok());
    }
}
