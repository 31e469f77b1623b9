//! Run report
//!
//! Every operation the topology implies is listed up front as
//! `not-attempted`; the reconciler then moves each one to `applied`,
//! `skipped` or `failed` as it goes. A run that aborts early therefore still
//! reports exactly which steps never ran.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Administrative operation kinds, in dependency order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OperationKind {
    InitiateReplicaSet,
    AddShard,
    EnableSharding,
    ShardCollection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Outcome {
    /// A mutating call was issued and succeeded.
    Applied,
    /// Already satisfied in the observed cluster state.
    Skipped,
    Failed,
    NotAttempted,
}

#[derive(Clone, Debug, Serialize)]
pub struct OperationRecord {
    pub kind: OperationKind,
    pub target: String,
    pub outcome: Outcome,
    /// Calls issued for this step, retries included.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

/// Machine-readable outcome of one reconcile run.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub converged: bool,
    pub summary: ReportSummary,
    pub operations: Vec<OperationRecord>,
}

impl Report {
    pub fn new(planned: impl IntoIterator<Item = (OperationKind, String)>) -> Self {
        let operations: Vec<OperationRecord> = planned
            .into_iter()
            .map(|(kind, target)| OperationRecord {
                kind,
                target,
                outcome: Outcome::NotAttempted,
                attempts: 0,
                detail: None,
            })
            .collect();

        let mut report = Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            converged: false,
            summary: ReportSummary::default(),
            operations,
        };
        report.refresh_summary();
        report
    }

    pub fn get(&self, kind: OperationKind, target: &str) -> Option<&OperationRecord> {
        self.operations
            .iter()
            .find(|op| op.kind == kind && op.target == target)
    }

    pub fn outcome(&self, kind: OperationKind, target: &str) -> Option<Outcome> {
        self.get(kind, target).map(|op| op.outcome)
    }

    /// Whether the step is satisfied, either by this run or beforehand.
    pub fn is_satisfied(&self, kind: OperationKind, target: &str) -> bool {
        matches!(
            self.outcome(kind, target),
            Some(Outcome::Applied | Outcome::Skipped)
        )
    }

    pub(crate) fn mark(
        &mut self,
        kind: OperationKind,
        target: &str,
        outcome: Outcome,
        attempts: u32,
        detail: Option<String>,
    ) {
        if let Some(op) = self
            .operations
            .iter_mut()
            .find(|op| op.kind == kind && op.target == target)
        {
            op.outcome = outcome;
            op.attempts += attempts;
            if detail.is_some() {
                op.detail = detail;
            }
        }
        self.refresh_summary();
    }

    pub(crate) fn finish(&mut self, converged: bool) {
        self.converged = converged;
        self.finished_at = Some(Utc::now());
        self.refresh_summary();
    }

    pub fn count(&self, kind: OperationKind, outcome: Outcome) -> usize {
        self.operations
            .iter()
            .filter(|op| op.kind == kind && op.outcome == outcome)
            .count()
    }

    fn refresh_summary(&mut self) {
        let mut summary = ReportSummary::default();
        for op in &self.operations {
            match op.outcome {
                Outcome::Applied => summary.applied += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::NotAttempted => summary.not_attempted += 1,
            }
        }
        self.summary = summary;
    }
}
