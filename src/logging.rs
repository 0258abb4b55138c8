//! Tracing subscriber setup for the binary

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Env var consulted before `RUST_LOG`
pub const LOG_ENV: &str = "RELAY_RANKER_LOG";

/// Default level from the `-v` / `-q` flags; verbose wins over quiet
pub fn level_from_flags(verbose: bool, quiet: bool) -> Level {
    if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        Level::INFO
    }
}

fn build_filter(default: Level) -> EnvFilter {
    [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .find_map(|var| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .and_then(|v| EnvFilter::try_new(v).ok())
        })
        .unwrap_or_else(|| EnvFilter::new(default.as_str().to_lowercase()))
}

/// Install the global subscriber, writing to stderr. Call once from `main`.
pub fn init(verbose: bool, quiet: bool) {
    let filter = build_filter(level_from_flags(verbose, quiet));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
