//! Transient error retry
//!
//! Administrative calls that fail with a transient error are retried with
//! exponential backoff until the configured attempt budget is spent. Any other
//! failure is returned immediately.

use super::cancel::{CancelReason, CancelSignal};
use crate::admin::AdminError;
use crate::config::ReconcilerConfig;
use crate::observability::events;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;

/// Build an exponential backoff without an elapsed-time limit; callers track
/// their own deadlines against the tokio clock.
pub(crate) fn exponential(
    initial: Duration,
    max: Duration,
    config: &ReconcilerConfig,
) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: max,
        multiplier: config.backoff_multiplier,
        randomization_factor: config.backoff_randomization,
        max_elapsed_time: None,
        ..Default::default()
    }
}

#[derive(Debug)]
pub(crate) enum RetryError {
    /// Still transient after the last allowed attempt.
    Exhausted(AdminError),
    /// Non-transient failure, not retried.
    Fatal(AdminError),
    Cancelled(CancelReason),
}

#[derive(Debug)]
pub(crate) struct Retried<T> {
    pub result: Result<T, RetryError>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts.
pub(crate) async fn with_retry<T, F, Fut>(
    config: &ReconcilerConfig,
    cancel: &CancelSignal,
    operation: &str,
    target: &str,
    mut op: F,
) -> Retried<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdminError>>,
{
    let mut backoff = exponential(config.retry_backoff_initial, config.retry_backoff_max, config);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let err = match op().await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            return Retried {
                result: Err(RetryError::Fatal(err)),
                attempts,
            };
        }
        if attempts >= config.max_attempts {
            return Retried {
                result: Err(RetryError::Exhausted(err)),
                attempts,
            };
        }

        let delay = backoff
            .next_backoff()
            .unwrap_or(config.retry_backoff_max);
        events::retry_scheduled(operation, target, attempts, delay, &err.to_string());

        if let Err(reason) = cancel.sleep(delay).await {
            return Retried {
                result: Err(RetryError::Cancelled(reason)),
                attempts,
            };
        }
    }
}
