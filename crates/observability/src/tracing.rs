//! Tracing/logging initialization.
//!
//! JSON lines on stdout. `RUST_LOG` wins over the default filter, e.g.
//! `RUST_LOG=fleetstats_infra=debug` to see every announcement.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Build the filter: `RUST_LOG` if valid, otherwise `default_directives`.
pub fn env_filter(default_directives: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

/// Initialize tracing/logging for the process.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_directives: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directives))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        init(DEFAULT_FILTER);
        assert!(!init(DEFAULT_FILTER));
        ::tracing::info!(alert = "fleet_stats_reconciliation", "still logs after re-init");
    }

    #[test]
    fn default_filter_parses() {
        let filter = EnvFilter::new(DEFAULT_FILTER);
        assert!(filter.to_string().contains("sqlx=warn"));
    }
}
