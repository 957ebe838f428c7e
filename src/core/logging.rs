//! Tracing subscriber bootstrap.
//!
//! `RUST_LOG` always wins. Otherwise quiet runs log warnings only, verbose runs
//! log debug, and everything else uses the configured level.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn resolve_level(configured: &str, quiet: bool, verbose: bool) -> Result<&'static str, String> {
    if quiet {
        return Ok("warn");
    }
    if verbose {
        return Ok("debug");
    }
    match configured.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(format!(
            "unsupported log level `{other}`; expected trace|debug|info|warn|error"
        )),
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_level(true)
                .with_target(false),
        )
        .try_init();
}
