//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level from config, overridable by `RUST_LOG`
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Human-readable fmt output; fields carry the machine-readable parts

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when neither `RUST_LOG` nor the config says otherwise.
pub const DEFAULT_FILTER: &str = "aggregator_proxy=info,tower_http=info";

/// Build the filter: `RUST_LOG` wins, then `log_level`, then the default.
pub fn env_filter(log_level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match log_level {
        Some(level) if !level.is_empty() => {
            EnvFilter::new(format!("aggregator_proxy={level},tower_http={level}"))
        }
        _ => EnvFilter::new(DEFAULT_FILTER),
    })
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(log_level: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_applies_to_proxy_targets() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let filter = env_filter(Some("debug")).to_string();
        assert!(filter.contains("aggregator_proxy=debug"));
        assert!(filter.contains("tower_http=debug"));

        assert_eq!(env_filter(Some("")).to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
        assert_eq!(env_filter(None).to_string(), EnvFilter::new(DEFAULT_FILTER).to_string());
    }
}
