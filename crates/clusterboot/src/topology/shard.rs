//! Shard descriptors

use super::ReplicaSetSpec;
use serde::{Deserialize, Serialize};

/// Shard identifier as reported by the router's shard list.
pub type ShardId = String;

/// A shard backed by one of the topology's replica sets.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShardSpec {
    /// Name of the backing replica set.
    pub replica_set: String,

    /// Explicit shard id. Defaults to the replica set name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Connection seed passed to add-shard. Derived from the replica set
    /// members when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_seed: Option<String>,
}

impl ShardSpec {
    pub fn for_replica_set(replica_set: impl Into<String>) -> Self {
        Self {
            replica_set: replica_set.into(),
            name: None,
            connection_seed: None,
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.name.clone().unwrap_or_else(|| self.replica_set.clone())
    }

    /// Resolve the seed string, deriving it from `set` when not given explicitly.
    pub fn resolve_seed(&self, set: &ReplicaSetSpec) -> String {
        self.connection_seed
            .clone()
            .unwrap_or_else(|| set.connection_seed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MemberSpec;

    #[test]
    fn test_derived_seed_matches_router_format() {
        let set = ReplicaSetSpec {
            name: "shard1ReplSet".to_string(),
            is_config_server: false,
            members: vec![MemberSpec::new("shard1", 27017)],
        };
        let shard = ShardSpec::for_replica_set("shard1ReplSet");
        assert_eq!(shard.resolve_seed(&set), "shard1ReplSet/shard1:27017");
        assert_eq!(shard.shard_id(), "shard1ReplSet");
    }

    #[test]
    fn test_explicit_name_and_seed() {
        let json = r#"{
            "replicaSet": "shard2ReplSet",
            "name": "east",
            "connectionSeed": "shard2ReplSet/shard2.internal:27018"
        }"#;
        let shard: ShardSpec = serde_json::from_str(json).unwrap();
        assert_eq!(shard.shard_id(), "east");
        let set = ReplicaSetSpec {
            name: "shard2ReplSet".to_string(),
            is_config_server: false,
            members: vec![MemberSpec::new("shard2", 27017)],
        };
        assert_eq!(shard.resolve_seed(&set), "shard2ReplSet/shard2.internal:27018");
    }
}
