//! # Logging
//!
//! Installs the global tracing subscriber. `RUST_LOG` wins over the configured
//! level; `LOG_FORMAT=json` switches to structured output for log shippers.

use tracing_subscriber::EnvFilter;

use crate::config::ControllerConfig;

/// Default directive when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_FILTER: &str = "virtual_cluster_operator=info";

#[must_use]
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = if level.is_empty() {
            DEFAULT_FILTER.to_string()
        } else {
            format!("virtual_cluster_operator={level}")
        };
        EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    })
}

/// Install the subscriber; a second call only logs a warning
pub fn init(config: &ControllerConfig) {
    let filter = env_filter(&config.log_level);
    let result = if config.log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if let Err(e) = result {
        tracing::warn!("Tracing subscriber already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_falls_back_to_default() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert_eq!(env_filter("not a level!!").to_string(), DEFAULT_FILTER);
        assert_eq!(
            env_filter("debug").to_string(),
            "virtual_cluster_operator=debug"
        );
    }
}
