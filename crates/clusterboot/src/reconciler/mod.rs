//! Reconciler
//!
//! Drives a live cluster toward its Topology Descriptor. Each pass observes
//! the cluster, skips whatever is already in place, and applies the rest in
//! dependency order:
//!
//! 1. config-server replica sets: initiate, then wait for a primary
//! 2. shard replica sets: initiate, then wait for a primary
//! 3. shard registration with the router
//! 4. sharding enablement per database
//! 5. collection sharding
//!
//! Nothing is remembered between runs. A failed run can simply be re-run and
//! resumes where the previous one stopped.

mod cancel;
mod error;
mod plan;
mod report;
mod retry;
mod state;

pub use cancel::{CancelHandle, CancelReason, CancelSignal};
pub use error::{exit_code, ReconcileError, ReconcileFailure};
pub use plan::{planned_operations, Plan, PlannedAction, PlannedOperation};
pub use report::{OperationKind, OperationRecord, Outcome, Report, ReportSummary};
pub use state::{ClusterState, RouterState};

use crate::admin::{AdminClient, AdminError, ReplicaSetStatus};
use crate::config::ReconcilerConfig;
use crate::observability::events;
use crate::topology::{ReplicaSetSpec, Topology};
use backoff::backoff::Backoff;
use retry::{with_retry, RetryError};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, instrument};

/// Bootstrap orchestrator over an [`AdminClient`].
pub struct Reconciler {
    admin: Arc<dyn AdminClient>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(admin: Arc<dyn AdminClient>, config: ReconcilerConfig) -> Self {
        Self { admin, config }
    }

    /// Run one full reconciliation pass.
    ///
    /// On failure the partial report is returned alongside the error. Steps
    /// that never ran are `not-attempted`.
    #[instrument(
        skip_all,
        fields(
            replica_sets = topology.replica_sets.len(),
            shards = topology.shards.len(),
            rules = topology.sharding_rules.len()
        )
    )]
    pub async fn reconcile(
        &self,
        topology: &Topology,
        cancel: CancelSignal,
    ) -> Result<Report, ReconcileFailure> {
        let mut report = Report::new(planned_operations(topology));
        let run_id = report.run_id.to_string();
        events::run_started(&run_id, report.operations.len());

        if let Err(issues) = topology.validate() {
            report.finish(false);
            return Err(ReconcileFailure {
                error: ReconcileError::TopologyValidation(issues),
                report,
            });
        }

        let cancel = self.apply_run_deadline(cancel);
        let mut pass = Pass {
            admin: self.admin.as_ref(),
            config: &self.config,
            cancel,
            report,
        };

        let outcome = pass.execute(topology).await;
        let mut report = pass.report;
        report.finish(outcome.is_ok());
        events::run_finished(
            &run_id,
            report.converged,
            report.summary.applied,
            report.summary.skipped,
            report.summary.failed,
        );

        match outcome {
            Ok(()) => Ok(report),
            Err(error) => Err(ReconcileFailure { error, report }),
        }
    }

    /// Observe the cluster and report what the next reconcile would do,
    /// without issuing any mutating call.
    #[instrument(skip_all)]
    pub async fn plan(
        &self,
        topology: &Topology,
        cancel: CancelSignal,
    ) -> Result<Plan, ReconcileError> {
        topology
            .validate()
            .map_err(ReconcileError::TopologyValidation)?;

        let cancel = self.apply_run_deadline(cancel);
        let pass = Pass {
            admin: self.admin.as_ref(),
            config: &self.config,
            cancel,
            report: Report::new(planned_operations(topology)),
        };

        let mut observed = ClusterState::default();
        for rs in topology.replica_sets_in_bootstrap_order() {
            let status = pass
                .observe(OperationKind::InitiateReplicaSet, &rs.name, || {
                    pass.admin.replica_set_status(rs)
                })
                .await?;
            observed.replica_sets.insert(rs.name.clone(), status);
        }

        let router_reachable = topology
            .replica_sets
            .iter()
            .filter(|rs| rs.is_config_server)
            .all(|rs| observed.has_primary(&rs.name));
        if router_reachable {
            observed.router = Some(pass.observe_router().await?);
        } else {
            info!("Config servers have no primary yet, router state unknown");
        }

        Ok(Plan::diff(topology, observed))
    }

    fn apply_run_deadline(&self, cancel: CancelSignal) -> CancelSignal {
        let Some(limit) = self.config.run_deadline else {
            return cancel;
        };
        let deadline = Instant::now() + limit;
        match cancel.deadline() {
            Some(existing) if existing <= deadline => cancel,
            _ => cancel.with_deadline(deadline),
        }
    }
}

/// State of a single run.
struct Pass<'a> {
    admin: &'a dyn AdminClient,
    config: &'a ReconcilerConfig,
    cancel: CancelSignal,
    report: Report,
}

impl<'a> Pass<'a> {
    async fn execute(&mut self, topology: &Topology) -> Result<(), ReconcileError> {
        let (config_sets, shard_sets): (Vec<&ReplicaSetSpec>, Vec<&ReplicaSetSpec>) = topology
            .replica_sets
            .iter()
            .partition(|rs| rs.is_config_server);

        self.bootstrap_replica_sets(&config_sets).await?;
        self.bootstrap_replica_sets(&shard_sets).await?;

        let router = self.observe_router().await?;
        self.register_shards(topology, &router).await?;
        self.enable_sharding(topology, &router).await?;
        self.shard_collections(topology, &router).await?;
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), ReconcileError> {
        match self.cancel.check() {
            Some(reason) => {
                info!(reason = %reason, "Stopping before next step");
                Err(ReconcileError::Cancelled { reason })
            }
            None => Ok(()),
        }
    }

    /// Mark a step failed and translate the retry outcome into a run error.
    fn fail(
        &mut self,
        kind: OperationKind,
        target: &str,
        attempts: u32,
        err: RetryError,
        on_fatal: impl FnOnce(AdminError) -> ReconcileError,
    ) -> ReconcileError {
        let error = match err {
            RetryError::Exhausted(e) => ReconcileError::exhausted(kind, target, attempts, e),
            RetryError::Fatal(e) => on_fatal(e),
            RetryError::Cancelled(reason) => {
                // In-flight calls finished; the step keeps its prior outcome.
                info!(
                    operation = %kind,
                    target = %target,
                    reason = %reason,
                    "Stopped during retry backoff"
                );
                return ReconcileError::Cancelled { reason };
            }
        };
        let detail = error.to_string();
        events::step_failed(&kind.to_string(), target, attempts, &detail);
        self.report
            .mark(kind, target, Outcome::Failed, attempts, Some(detail));
        error
    }

    fn skip(&mut self, kind: OperationKind, target: &str, reason: &str) {
        events::step_skipped(&kind.to_string(), target, reason);
        self.report
            .mark(kind, target, Outcome::Skipped, 0, Some(reason.to_string()));
    }

    /// Read-only call with transient retry. Not recorded as a step attempt.
    async fn observe<T, F, Fut>(
        &self,
        kind: OperationKind,
        target: &str,
        op: F,
    ) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdminError>>,
    {
        let retried = with_retry(self.config, &self.cancel, "observe", target, op).await;
        retried.result.map_err(|err| match err {
            RetryError::Exhausted(e) => {
                ReconcileError::exhausted(kind, target, retried.attempts, e)
            }
            RetryError::Fatal(e) => ReconcileError::rejected(kind, target, e),
            RetryError::Cancelled(reason) => ReconcileError::Cancelled { reason },
        })
    }

    async fn observe_router(&self) -> Result<RouterState, ReconcileError> {
        let admin = self.admin;
        let shards = self
            .observe(OperationKind::AddShard, "router", || admin.list_shards())
            .await?;
        let sharding_enabled_databases = self
            .observe(OperationKind::EnableSharding, "router", || {
                admin.list_sharding_enabled_databases()
            })
            .await?;
        let sharded_collections = self
            .observe(OperationKind::ShardCollection, "router", || {
                admin.list_sharded_collections()
            })
            .await?;

        Ok(RouterState {
            shards,
            sharding_enabled_databases,
            sharded_collections,
        })
    }

    /// Initiate every uninitialized set of one group, then wait for each to
    /// elect a primary.
    async fn bootstrap_replica_sets(
        &mut self,
        sets: &[&ReplicaSetSpec],
    ) -> Result<(), ReconcileError> {
        let admin = self.admin;
        let kind = OperationKind::InitiateReplicaSet;

        for rs in sets {
            self.checkpoint()?;

            let status = match self
                .observe(kind, &rs.name, || admin.replica_set_status(rs))
                .await
            {
                Ok(status) => status,
                Err(error @ ReconcileError::Cancelled { .. }) => return Err(error),
                Err(error) => {
                    let detail = error.to_string();
                    events::step_failed(&kind.to_string(), &rs.name, 0, &detail);
                    self.report
                        .mark(kind, &rs.name, Outcome::Failed, 0, Some(detail));
                    return Err(error);
                }
            };

            if status.initialized {
                self.skip(kind, &rs.name, "already initialized");
                continue;
            }

            let retried = with_retry(
                self.config,
                &self.cancel,
                "initiate-replica-set",
                &rs.name,
                || admin.initiate_replica_set(rs),
            )
            .await;

            match retried.result {
                Ok(()) => {
                    events::replica_set_initiated(&rs.name, rs.members.len(), rs.is_config_server);
                    self.report
                        .mark(kind, &rs.name, Outcome::Applied, retried.attempts, None);
                }
                Err(RetryError::Fatal(AdminError::AlreadyInitialized(_))) => {
                    self.skip(kind, &rs.name, "initialized concurrently");
                }
                Err(err) => {
                    return Err(self.fail(kind, &rs.name, retried.attempts, err, |e| {
                        ReconcileError::rejected(kind, &rs.name, e)
                    }));
                }
            }
        }

        for rs in sets {
            self.wait_for_primary(rs).await?;
        }
        Ok(())
    }

    /// Poll status with exponential backoff until a stable primary appears or
    /// the convergence deadline passes.
    ///
    /// A freshly initiated member may refuse connections for a while, so
    /// transient status failures count as "not converged yet" rather than
    /// using up the per-call retry budget.
    async fn wait_for_primary(&mut self, rs: &ReplicaSetSpec) -> Result<(), ReconcileError> {
        let admin = self.admin;
        let kind = OperationKind::InitiateReplicaSet;
        let started = Instant::now();
        let deadline = started + self.config.convergence_timeout;
        let mut backoff = retry::exponential(
            self.config.convergence_backoff_initial,
            self.config.convergence_backoff_max,
            self.config,
        );
        let mut last_status = ReplicaSetStatus::uninitialized(rs.name.clone());
        let mut polls = 0u32;

        loop {
            polls += 1;
            let unreachable = match admin.replica_set_status(rs).await {
                Ok(status) if status.has_stable_primary() => {
                    let primary = status.primary().unwrap_or_default();
                    events::replica_set_converged(&rs.name, primary, polls, started.elapsed());
                    return Ok(());
                }
                Ok(status) => {
                    last_status = status;
                    None
                }
                Err(e) if e.is_transient() => Some(e),
                Err(e) => {
                    return Err(self.fail(kind, &rs.name, 0, RetryError::Fatal(e), |e| {
                        ReconcileError::rejected(kind, &rs.name, e)
                    }));
                }
            };

            let now = Instant::now();
            if now >= deadline {
                let error = ReconcileError::ReplicaSetConvergenceTimeout {
                    name: rs.name.clone(),
                    waited: now - started,
                    last_status,
                };
                let detail = error.to_string();
                events::step_failed(&kind.to_string(), &rs.name, 0, &detail);
                self.report
                    .mark(kind, &rs.name, Outcome::Failed, 0, Some(detail));
                return Err(error);
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.convergence_backoff_max)
                .min(deadline - now);
            if let Some(e) = unreachable {
                let error = e.to_string();
                events::retry_scheduled("replica-set-status", &rs.name, polls, delay, &error);
            }
            if let Err(reason) = self.cancel.sleep(delay).await {
                info!(replica_set = %rs.name, reason = %reason, "Stopped waiting for primary");
                return Err(ReconcileError::Cancelled { reason });
            }
        }
    }

    async fn register_shards(
        &mut self,
        topology: &Topology,
        router: &RouterState,
    ) -> Result<(), ReconcileError> {
        let admin = self.admin;
        let kind = OperationKind::AddShard;

        for shard in &topology.shards {
            self.checkpoint()?;
            let id = shard.shard_id();

            if router.shards.contains(&id) {
                self.skip(kind, &id, "already registered");
                continue;
            }

            // Validation guarantees the reference resolves.
            let Some(rs) = topology.replica_set(&shard.replica_set) else {
                continue;
            };
            debug_assert!(self.report.is_satisfied(OperationKind::InitiateReplicaSet, &rs.name));

            let seed = shard.resolve_seed(rs);
            let retried = with_retry(self.config, &self.cancel, "add-shard", &id, || {
                admin.add_shard(&id, &seed)
            })
            .await;

            match retried.result {
                Ok(()) => {
                    events::shard_registered(&id, &seed);
                    self.report
                        .mark(kind, &id, Outcome::Applied, retried.attempts, None);
                }
                Err(err) => {
                    return Err(self.fail(kind, &id, retried.attempts, err, |e| {
                        ReconcileError::rejected(kind, &id, e)
                    }));
                }
            }
        }
        Ok(())
    }

    async fn enable_sharding(
        &mut self,
        topology: &Topology,
        router: &RouterState,
    ) -> Result<(), ReconcileError> {
        let admin = self.admin;
        let kind = OperationKind::EnableSharding;

        for db in topology.sharded_databases() {
            self.checkpoint()?;

            if router.sharding_enabled_databases.contains(db) {
                self.skip(kind, db, "sharding already enabled");
                continue;
            }

            let retried = with_retry(self.config, &self.cancel, "enable-sharding", db, || {
                admin.enable_sharding(db)
            })
            .await;

            match retried.result {
                Ok(()) => {
                    events::sharding_enabled(db);
                    self.report
                        .mark(kind, db, Outcome::Applied, retried.attempts, None);
                }
                Err(err) => {
                    return Err(self.fail(kind, db, retried.attempts, err, |e| {
                        ReconcileError::rejected(kind, db, e)
                    }));
                }
            }
        }
        Ok(())
    }

    async fn shard_collections(
        &mut self,
        topology: &Topology,
        router: &RouterState,
    ) -> Result<(), ReconcileError> {
        let admin = self.admin;
        let kind = OperationKind::ShardCollection;

        for rule in &topology.sharding_rules {
            self.checkpoint()?;
            let ns = rule.namespace();
            let target = ns.to_string();

            if router.sharded_collections.contains(&ns) {
                self.skip(kind, &target, "already sharded");
                continue;
            }
            debug_assert!(self.report.is_satisfied(OperationKind::EnableSharding, &rule.database));

            let retried = with_retry(self.config, &self.cancel, "shard-collection", &target, || {
                admin.shard_collection(&ns, &rule.key, rule.unique)
            })
            .await;

            match retried.result {
                Ok(()) => {
                    let key = serde_json::Value::Object(rule.key.clone()).to_string();
                    events::collection_sharded(&target, &key);
                    self.report
                        .mark(kind, &target, Outcome::Applied, retried.attempts, None);
                }
                Err(err) => {
                    return Err(self.fail(kind, &target, retried.attempts, err, |e| {
                        ReconcileError::shard_collection_rejected(&target, e)
                    }));
                }
            }
        }
        Ok(())
    }
}
