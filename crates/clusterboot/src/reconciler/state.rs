//! Observed cluster state
//!
//! Built fresh from live inspection on every pass and never persisted, so
//! the reconciler's view cannot drift from the cluster across runs.

use crate::admin::ReplicaSetStatus;
use crate::topology::{Namespace, ShardId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Router-side metadata as reported by the cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouterState {
    pub shards: BTreeSet<ShardId>,
    pub sharding_enabled_databases: BTreeSet<String>,
    pub sharded_collections: BTreeSet<Namespace>,
}

/// Everything the reconciler knows about the live cluster.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ClusterState {
    /// Last observed status per replica set.
    pub replica_sets: BTreeMap<String, ReplicaSetStatus>,
    /// `None` while the router cannot be queried (e.g. config servers not up yet).
    pub router: Option<RouterState>,
}

impl ClusterState {
    pub fn is_initialized(&self, replica_set: &str) -> bool {
        self.replica_sets
            .get(replica_set)
            .is_some_and(|s| s.initialized)
    }

    pub fn has_primary(&self, replica_set: &str) -> bool {
        self.replica_sets
            .get(replica_set)
            .is_some_and(ReplicaSetStatus::has_stable_primary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{MemberState, MemberStatus};

    #[test]
    fn test_initialized_sets() {
        let mut state = ClusterState::default();
        state
            .replica_sets
            .insert("a".to_string(), ReplicaSetStatus::uninitialized("a"));
        state.replica_sets.insert(
            "b".to_string(),
            ReplicaSetStatus {
                name: "b".to_string(),
                initialized: true,
                members: vec![MemberStatus {
                    host: "b:27017".to_string(),
                    state: MemberState::Primary,
                }],
            },
        );

        assert!(state.is_initialized("b"));
        assert!(!state.is_initialized("a"));
        assert!(state.has_primary("b"));
        assert!(!state.has_primary("missing"));
    }
}
