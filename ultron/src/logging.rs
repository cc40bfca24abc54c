//! Tracing subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging once for the process.
///
/// Default: `info` for ultron, `warn` for everything else; `--verbose` turns
/// on `debug` (malformed packets, exclusions, whitelist reloads).
/// `RUST_LOG` overrides both.
pub fn init(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,ultron={level},ultron_core={level}"))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
