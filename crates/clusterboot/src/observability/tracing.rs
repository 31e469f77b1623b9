//! Logging Setup
//!
//! Console logging through `tracing-subscriber`:
//! - Environment-based filtering via `RUST_LOG` (default `info`)
//! - `LOG_FORMAT=json` switches to one JSON object per line
//!
//! Logs go to stderr so the report on stdout stays machine-readable.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
    /// Default level when `RUST_LOG` is unset
    pub default_level: LevelFilter,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            default_level: LevelFilter::INFO,
        }
    }
}

impl TracingConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn is_json(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(config: TracingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.default_level.into())
        .from_env_lossy();

    if config.is_json() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    tracing::debug!(format = %config.log_format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_json_detection() {
        let config = TracingConfig {
            log_format: "JSON".to_string(),
            default_level: LevelFilter::INFO,
        };
        assert!(config.is_json());

        let config = TracingConfig {
            log_format: "text".to_string(),
            ..config
        };
        assert!(!config.is_json());
    }
}
