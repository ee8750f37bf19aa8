//! Shared tracing/logging initialization.
//!
//! The bootstrap binary and the HTTP front log through the same subscriber:
//! an env-filter scoped to the workspace crates plus optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crates whose log level follows the `--log-level` flag.
const CRATES: &[&str] = &["nodeboot", "nodeboot_core", "nodeboot_front", "tower_http"];

/// Build the default filter directive for `level`, e.g.
/// `nodeboot=info,nodeboot_core=info,...`.
pub fn default_filter(level: &str) -> String {
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins over `level` when it is set. With `log_json` the output is
/// one JSON object per line.
pub fn init_tracing(level: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(level)));
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_every_crate() {
        let filter = default_filter("debug");
        assert_eq!(
            filter,
            "nodeboot=debug,nodeboot_core=debug,nodeboot_front=debug,tower_http=debug"
        );
    }
}
