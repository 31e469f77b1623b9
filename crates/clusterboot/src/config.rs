//! Reconciler Configuration
//!
//! Retry, backoff and deadline settings for a bootstrap run, with environment
//! variable overrides.

use std::time::Duration;

/// Reconciler configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    // Convergence polling
    /// First delay between replica set status polls
    pub convergence_backoff_initial: Duration,

    /// Cap on the delay between status polls
    pub convergence_backoff_max: Duration,

    /// Hard deadline for a replica set to elect a primary
    /// (env: CLUSTERBOOT_CONVERGENCE_TIMEOUT_SECS)
    pub convergence_timeout: Duration,

    // Transient error retry
    /// Attempts per administrative call, including the first (env: CLUSTERBOOT_MAX_ATTEMPTS)
    pub max_attempts: u32,

    /// First delay before retrying a transient failure
    pub retry_backoff_initial: Duration,

    /// Cap on the delay between retries
    pub retry_backoff_max: Duration,

    /// Multiplier applied to both backoff sequences
    pub backoff_multiplier: f64,

    /// Jitter applied to both backoff sequences (0.0 disables it)
    pub backoff_randomization: f64,

    // Whole-run limit
    /// Deadline for the entire run (env: CLUSTERBOOT_RUN_DEADLINE_SECS)
    pub run_deadline: Option<Duration>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            convergence_backoff_initial: Duration::from_millis(250),
            convergence_backoff_max: Duration::from_secs(5),
            convergence_timeout: Duration::from_secs(120),

            max_attempts: 5,
            retry_backoff_initial: Duration::from_millis(500),
            retry_backoff_max: Duration::from_secs(10),

            backoff_multiplier: 2.0,
            backoff_randomization: 0.2,

            run_deadline: None,
        }
    }
}

impl ReconcilerConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_u64("CLUSTERBOOT_CONVERGENCE_TIMEOUT_SECS") {
            config.convergence_timeout = Duration::from_secs(secs);
        }

        if let Some(attempts) = env_u64("CLUSTERBOOT_MAX_ATTEMPTS") {
            config.max_attempts = u32::try_from(attempts).unwrap_or(u32::MAX).max(1);
        }

        if let Some(secs) = env_u64("CLUSTERBOOT_RUN_DEADLINE_SECS") {
            config.run_deadline = Some(Duration::from_secs(secs));
        }

        config
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.convergence_backoff_initial, Duration::from_millis(250));
        assert_eq!(config.convergence_backoff_max, Duration::from_secs(5));
        assert_eq!(config.convergence_timeout, Duration::from_secs(120));
        assert_eq!(config.max_attempts, 5);
        assert!(config.run_deadline.is_none());
    }
}
