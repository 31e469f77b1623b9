//! Dry-run plans

use super::report::OperationKind;
use super::state::ClusterState;
use crate::topology::Topology;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PlannedAction {
    /// Would issue a mutating call.
    Apply,
    /// Already satisfied.
    Skip,
    /// Depends on state that cannot be observed yet.
    Pending,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlannedOperation {
    pub kind: OperationKind,
    pub target: String,
    pub action: PlannedAction,
}

/// What the next reconcile would do against the currently observed cluster.
#[derive(Clone, Debug, Serialize)]
pub struct Plan {
    pub operations: Vec<PlannedOperation>,
    pub observed: ClusterState,
}

impl Plan {
    pub fn is_converged(&self) -> bool {
        self.operations
            .iter()
            .all(|op| op.action == PlannedAction::Skip)
    }

    pub fn count(&self, action: PlannedAction) -> usize {
        self.operations
            .iter()
            .filter(|op| op.action == action)
            .count()
    }

    /// Diff the topology against observed state.
    pub fn diff(topology: &Topology, observed: ClusterState) -> Self {
        let mut operations = Vec::new();

        for rs in topology.replica_sets_in_bootstrap_order() {
            let action = if observed.is_initialized(&rs.name) {
                PlannedAction::Skip
            } else {
                PlannedAction::Apply
            };
            operations.push(PlannedOperation {
                kind: OperationKind::InitiateReplicaSet,
                target: rs.name.clone(),
                action,
            });
        }

        let router = observed.router.as_ref();
        let router_action = |present: Option<bool>| match present {
            None => PlannedAction::Pending,
            Some(true) => PlannedAction::Skip,
            Some(false) => PlannedAction::Apply,
        };

        for shard in &topology.shards {
            let id = shard.shard_id();
            let action = router_action(router.map(|r| r.shards.contains(&id)));
            operations.push(PlannedOperation {
                kind: OperationKind::AddShard,
                target: id,
                action,
            });
        }

        for db in topology.sharded_databases() {
            let action = router_action(router.map(|r| r.sharding_enabled_databases.contains(db)));
            operations.push(PlannedOperation {
                kind: OperationKind::EnableSharding,
                target: db.to_string(),
                action,
            });
        }

        for rule in &topology.sharding_rules {
            let ns = rule.namespace();
            let action = router_action(router.map(|r| r.sharded_collections.contains(&ns)));
            operations.push(PlannedOperation {
                kind: OperationKind::ShardCollection,
                target: ns.to_string(),
                action,
            });
        }

        Self {
            operations,
            observed,
        }
    }
}

/// Every operation the topology implies, in the order the reconciler runs them.
pub fn planned_operations(topology: &Topology) -> Vec<(OperationKind, String)> {
    let replica_sets = topology
        .replica_sets_in_bootstrap_order()
        .into_iter()
        .map(|rs| (OperationKind::InitiateReplicaSet, rs.name.clone()));
    let shards = topology
        .shards
        .iter()
        .map(|s| (OperationKind::AddShard, s.shard_id()));
    let databases = topology
        .sharded_databases()
        .into_iter()
        .map(|db| (OperationKind::EnableSharding, db.to_string()));
    let collections = topology
        .sharding_rules
        .iter()
        .map(|r| (OperationKind::ShardCollection, r.namespace().to_string()));

    replica_sets
        .chain(shards)
        .chain(databases)
        .chain(collections)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::ReplicaSetStatus;
    use crate::reconciler::state::RouterState;
    use crate::topology::fixtures::reference_topology;

    #[test]
    fn test_planned_operations_order() {
        let ops = planned_operations(&reference_topology());
        let kinds: Vec<OperationKind> = ops.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            [
                OperationKind::InitiateReplicaSet,
                OperationKind::InitiateReplicaSet,
                OperationKind::InitiateReplicaSet,
                OperationKind::AddShard,
                OperationKind::AddShard,
                OperationKind::EnableSharding,
                OperationKind::ShardCollection,
            ]
        );
        assert_eq!(ops[0].1, "configReplSet");
        assert_eq!(ops[6].1, "db1.events.logs");
    }

    #[test]
    fn test_router_steps_pending_without_router() {
        let plan = Plan::diff(&reference_topology(), ClusterState::default());
        assert_eq!(plan.count(PlannedAction::Apply), 3);
        assert_eq!(plan.count(PlannedAction::Pending), 4);
        assert!(!plan.is_converged());
    }

    #[test]
    fn test_partial_router_state() {
        let topology = reference_topology();
        let mut observed = ClusterState::default();
        for rs in &topology.replica_sets {
            let mut status = ReplicaSetStatus::uninitialized(rs.name.clone());
            status.initialized = true;
            observed.replica_sets.insert(rs.name.clone(), status);
        }
        observed.router = Some(RouterState {
            shards: ["shard1ReplSet".to_string()].into(),
            ..Default::default()
        });

        let plan = Plan::diff(&topology, observed);
        let actions: Vec<PlannedAction> = plan.operations.iter().map(|op| op.action).collect();
        assert_eq!(
            actions,
            [
                PlannedAction::Skip,
                PlannedAction::Skip,
                PlannedAction::Skip,
                PlannedAction::Skip,
                PlannedAction::Apply,
                PlannedAction::Apply,
                PlannedAction::Apply,
            ]
        );
    }
}
