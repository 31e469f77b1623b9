//! Reconcile errors and exit codes

use super::cancel::CancelReason;
use super::report::{OperationKind, Report};
use crate::admin::{AdminError, ReplicaSetStatus};
use crate::topology::ValidationIssue;
use std::time::Duration;
use thiserror::Error;

/// Process exit codes for each failure class.
pub mod exit_code {
    pub const CONVERGED: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const VALIDATION: i32 = 2;
    pub const CONVERGENCE_TIMEOUT: i32 = 3;
    pub const STRUCTURAL_CONFLICT: i32 = 4;
    pub const CONNECTIVITY_EXHAUSTED: i32 = 5;
    pub const CANCELLED: i32 = 6;
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("topology validation failed: {}", join_issues(.0))]
    TopologyValidation(Vec<ValidationIssue>),

    #[error(
        "replica set '{name}' did not elect a primary within {waited:?} (last status: {})",
        .last_status.summary()
    )]
    ReplicaSetConvergenceTimeout {
        name: String,
        waited: Duration,
        last_status: ReplicaSetStatus,
    },

    #[error("cannot shard {namespace}: {message}")]
    ShardKeyConflict { namespace: String, message: String },

    #[error("{step} on '{target}' still failing after {attempts} attempts: {last_error}")]
    ConnectivityExhausted {
        step: String,
        target: String,
        attempts: u32,
        #[source]
        last_error: AdminError,
    },

    #[error("{step} on '{target}' was rejected: {source}")]
    Rejected {
        step: String,
        target: String,
        #[source]
        source: AdminError,
    },

    #[error("run stopped: {reason}")]
    Cancelled { reason: CancelReason },
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ReconcileError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReconcileError::TopologyValidation(_) => exit_code::VALIDATION,
            ReconcileError::ReplicaSetConvergenceTimeout { .. } => exit_code::CONVERGENCE_TIMEOUT,
            ReconcileError::ShardKeyConflict { .. } | ReconcileError::Rejected { .. } => {
                exit_code::STRUCTURAL_CONFLICT
            }
            ReconcileError::ConnectivityExhausted { .. } => exit_code::CONNECTIVITY_EXHAUSTED,
            ReconcileError::Cancelled { .. } => exit_code::CANCELLED,
        }
    }

    /// Short machine-readable class name.
    pub fn class(&self) -> &'static str {
        match self {
            ReconcileError::TopologyValidation(_) => "topology-validation",
            ReconcileError::ReplicaSetConvergenceTimeout { .. } => {
                "replica-set-convergence-timeout"
            }
            ReconcileError::ShardKeyConflict { .. } => "shard-key-conflict",
            ReconcileError::ConnectivityExhausted { .. } => "connectivity-exhausted",
            ReconcileError::Rejected { .. } => "rejected",
            ReconcileError::Cancelled { .. } => "cancelled",
        }
    }

    pub(crate) fn exhausted(
        step: OperationKind,
        target: &str,
        attempts: u32,
        last_error: AdminError,
    ) -> Self {
        ReconcileError::ConnectivityExhausted {
            step: step.to_string(),
            target: target.to_string(),
            attempts,
            last_error,
        }
    }

    /// A server refusal to shard is a key conflict; a shell or protocol
    /// failure is not.
    pub(crate) fn shard_collection_rejected(namespace: &str, source: AdminError) -> Self {
        match source {
            AdminError::Command { .. } => ReconcileError::ShardKeyConflict {
                namespace: namespace.to_string(),
                message: source.to_string(),
            },
            other => ReconcileError::rejected(OperationKind::ShardCollection, namespace, other),
        }
    }

    pub(crate) fn rejected(step: OperationKind, target: &str, source: AdminError) -> Self {
        ReconcileError::Rejected {
            step: step.to_string(),
            target: target.to_string(),
            source,
        }
    }
}

/// A failed run: the fatal error plus the progress made before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ReconcileFailure {
    #[source]
    pub error: ReconcileError,
    pub report: Report,
}

impl ReconcileFailure {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}
