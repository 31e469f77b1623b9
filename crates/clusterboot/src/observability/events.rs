//! Structured Events
//!
//! One function per bootstrap event so field names stay consistent across
//! the reconciler. Every event carries an `event_type` field.
//!
//! Event types:
//! - `run_started` / `run_finished` - reconcile run lifecycle
//! - `replica_set_initiated` - initiate call succeeded
//! - `replica_set_converged` - a stable primary was observed
//! - `shard_registered` - add-shard succeeded
//! - `sharding_enabled` - enable-sharding succeeded
//! - `collection_sharded` - shard-collection succeeded
//! - `step_skipped` - step already satisfied in observed state
//! - `step_failed` - step failed fatally
//! - `retry_scheduled` - transient failure, retrying after a delay

use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Emit a run started event
pub fn run_started(run_id: &str, planned_operations: usize) {
    info!(
        event_type = "run_started",
        run_id = %run_id,
        planned_operations = planned_operations,
        "Reconcile run started"
    );
}

/// Emit a run finished event
pub fn run_finished(run_id: &str, converged: bool, applied: usize, skipped: usize, failed: usize) {
    if converged {
        info!(
            event_type = "run_finished",
            run_id = %run_id,
            converged = converged,
            applied = applied,
            skipped = skipped,
            failed = failed,
            "Cluster converged"
        );
    } else {
        error!(
            event_type = "run_finished",
            run_id = %run_id,
            converged = converged,
            applied = applied,
            skipped = skipped,
            failed = failed,
            "Cluster did not converge"
        );
    }
}

/// Emit a replica set initiated event
pub fn replica_set_initiated(name: &str, members: usize, config_server: bool) {
    info!(
        event_type = "replica_set_initiated",
        replica_set = %name,
        members = members,
        config_server = config_server,
        "Replica set initiated"
    );
}

/// Emit a replica set converged event
pub fn replica_set_converged(name: &str, primary: &str, polls: u32, elapsed: Duration) {
    info!(
        event_type = "replica_set_converged",
        replica_set = %name,
        primary = %primary,
        polls = polls,
        elapsed_ms = elapsed.as_millis() as u64,
        "Replica set has a primary"
    );
}

/// Emit a shard registered event
pub fn shard_registered(shard_id: &str, connection_seed: &str) {
    info!(
        event_type = "shard_registered",
        shard_id = %shard_id,
        connection_seed = %connection_seed,
        "Shard registered"
    );
}

/// Emit a sharding enabled event
pub fn sharding_enabled(database: &str) {
    info!(
        event_type = "sharding_enabled",
        database = %database,
        "Sharding enabled"
    );
}

/// Emit a collection sharded event
pub fn collection_sharded(namespace: &str, key: &str) {
    info!(
        event_type = "collection_sharded",
        namespace = %namespace,
        key = %key,
        "Collection sharded"
    );
}

/// Emit a step skipped event
pub fn step_skipped(operation: &str, target: &str, reason: &str) {
    debug!(
        event_type = "step_skipped",
        operation = %operation,
        target = %target,
        reason = %reason,
        "Step already satisfied"
    );
}

/// Emit a step failed event
pub fn step_failed(operation: &str, target: &str, attempts: u32, error: &str) {
    error!(
        event_type = "step_failed",
        operation = %operation,
        target = %target,
        attempts = attempts,
        error = %error,
        "Step failed"
    );
}

/// Emit a retry scheduled event
pub fn retry_scheduled(operation: &str, target: &str, attempt: u32, delay: Duration, error: &str) {
    warn!(
        event_type = "retry_scheduled",
        operation = %operation,
        target = %target,
        attempt = attempt,
        delay_ms = delay.as_millis() as u64,
        error = %error,
        "Transient failure, retrying"
    );
}
