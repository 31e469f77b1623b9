//! Topology Descriptor
//!
//! Declarative description of the desired cluster: replica sets and their
//! members, the shards they back, and the collections to shard.
//!
//! A descriptor is loaded once per run from YAML or JSON and validated before
//! any administrative call is issued.

pub mod replica_set;
pub mod rule;
pub mod shard;

pub use replica_set::{MemberSpec, ReplicaSetSpec};
pub use rule::{Namespace, ShardKey, ShardingRule};
pub use shard::{ShardId, ShardSpec};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading a descriptor file.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML topology: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid JSON topology: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported topology format '{0}' (expected .yaml, .yml or .json)")]
    UnsupportedFormat(String),
}

/// A single violated descriptor invariant.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "kebab-case")]
pub enum ValidationIssue {
    #[error("replica set '{name}' has no members")]
    EmptyReplicaSet { name: String },
    #[error("replica set name '{name}' is declared more than once")]
    DuplicateReplicaSet { name: String },
    #[error("member {address} appears in more than one place")]
    DuplicateMember { address: String },
    #[error("expected exactly one config server replica set, found {count}")]
    ConfigServerCount { count: usize },
    #[error("shard '{shard}' references unknown replica set '{replica_set}'")]
    UnknownReplicaSet { shard: String, replica_set: String },
    #[error("shard '{shard}' cannot be backed by config server set '{replica_set}'")]
    ConfigServerAsShard { shard: String, replica_set: String },
    #[error("shard '{shard}' is declared more than once")]
    DuplicateShard { shard: String },
    #[error("replica set '{replica_set}' backs more than one shard")]
    DuplicateShardReplicaSet { replica_set: String },
    #[error("sharding rule has an empty database or collection name")]
    EmptyNamespace,
    #[error("database name '{database}' contains a character that is not allowed")]
    InvalidDatabaseName { database: String },
    #[error("sharding rule for {namespace} has an empty shard key")]
    EmptyShardKey { namespace: String },
    #[error("sharding rule for {namespace} has invalid key directions on: {fields}")]
    InvalidKeyDirection { namespace: String, fields: String },
    #[error("collection {namespace} has more than one sharding rule")]
    DuplicateRule { namespace: String },
}

/// Characters the server rejects in database names. A dot would also make the
/// observed `db.collection` namespace split differently from the rule.
const INVALID_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$'];

/// Desired end state of the cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub replica_sets: Vec<ReplicaSetSpec>,

    #[serde(default)]
    pub shards: Vec<ShardSpec>,

    #[serde(default)]
    pub sharding_rules: Vec<ShardingRule>,
}

impl Topology {
    /// Load a descriptor, choosing the parser from the file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml(&contents),
            "json" => Ok(serde_json::from_str(&contents)?),
            other => Err(TopologyError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, TopologyError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn replica_set(&self, name: &str) -> Option<&ReplicaSetSpec> {
        self.replica_sets.iter().find(|rs| rs.name == name)
    }

    /// Config-server sets first, then shard sets, each in declaration order.
    pub fn replica_sets_in_bootstrap_order(&self) -> Vec<&ReplicaSetSpec> {
        let (config, data): (Vec<_>, Vec<_>) =
            self.replica_sets.iter().partition(|rs| rs.is_config_server);
        config.into_iter().chain(data).collect()
    }

    /// Distinct databases referenced by sharding rules, in first-seen order.
    pub fn sharded_databases(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.sharding_rules
            .iter()
            .map(|r| r.database.as_str())
            .filter(|db| seen.insert(*db))
            .collect()
    }

    /// Check every descriptor invariant, returning all violations at once.
    pub fn validate(&self) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        let mut names = HashSet::new();
        let mut addresses = HashSet::new();
        for rs in &self.replica_sets {
            if !names.insert(rs.name.as_str()) {
                issues.push(ValidationIssue::DuplicateReplicaSet {
                    name: rs.name.clone(),
                });
            }
            if rs.members.is_empty() {
                issues.push(ValidationIssue::EmptyReplicaSet {
                    name: rs.name.clone(),
                });
            }
            for member in &rs.members {
                let address = member.address();
                if !addresses.insert(address.clone()) {
                    issues.push(ValidationIssue::DuplicateMember { address });
                }
            }
        }

        let config_count = self
            .replica_sets
            .iter()
            .filter(|rs| rs.is_config_server)
            .count();
        if config_count != 1 {
            issues.push(ValidationIssue::ConfigServerCount {
                count: config_count,
            });
        }

        let mut shard_ids = HashSet::new();
        let mut backing_sets = HashSet::new();
        for shard in &self.shards {
            let id = shard.shard_id();
            match self.replica_set(&shard.replica_set) {
                None => issues.push(ValidationIssue::UnknownReplicaSet {
                    shard: id.clone(),
                    replica_set: shard.replica_set.clone(),
                }),
                Some(rs) if rs.is_config_server => {
                    issues.push(ValidationIssue::ConfigServerAsShard {
                        shard: id.clone(),
                        replica_set: shard.replica_set.clone(),
                    })
                }
                Some(_) => {}
            }
            if !shard_ids.insert(id.clone()) {
                issues.push(ValidationIssue::DuplicateShard { shard: id });
            } else if !backing_sets.insert(shard.replica_set.as_str()) {
                issues.push(ValidationIssue::DuplicateShardReplicaSet {
                    replica_set: shard.replica_set.clone(),
                });
            }
        }

        let mut namespaces = BTreeSet::new();
        for rule in &self.sharding_rules {
            if rule.database.is_empty() || rule.collection.is_empty() {
                issues.push(ValidationIssue::EmptyNamespace);
                continue;
            }
            if rule.database.contains(INVALID_DATABASE_CHARS) {
                issues.push(ValidationIssue::InvalidDatabaseName {
                    database: rule.database.clone(),
                });
                continue;
            }
            let namespace = rule.namespace().to_string();
            if rule.key.is_empty() {
                issues.push(ValidationIssue::EmptyShardKey {
                    namespace: namespace.clone(),
                });
            }
            let invalid = rule.invalid_key_fields();
            if !invalid.is_empty() {
                issues.push(ValidationIssue::InvalidKeyDirection {
                    namespace: namespace.clone(),
                    fields: invalid.join(", "),
                });
            }
            if !namespaces.insert(namespace.clone()) {
                issues.push(ValidationIssue::DuplicateRule { namespace });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::reference_topology;
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_reference_topology_is_valid() {
        assert_eq!(reference_topology().validate(), Ok(()));
    }

    #[test]
    fn test_bootstrap_order_puts_config_server_first() {
        let mut topology = reference_topology();
        topology.replica_sets.rotate_left(1);
        let order: Vec<&str> = topology
            .replica_sets_in_bootstrap_order()
            .iter()
            .map(|rs| rs.name.as_str())
            .collect();
        assert_eq!(order, ["configReplSet", "shard1ReplSet", "shard2ReplSet"]);
    }

    #[test]
    fn test_missing_config_server() {
        let mut topology = reference_topology();
        topology.replica_sets[0].is_config_server = false;
        let issues = topology.validate().unwrap_err();
        assert!(issues.contains(&ValidationIssue::ConfigServerCount { count: 0 }));
    }

    #[test]
    fn test_two_config_servers() {
        let mut topology = reference_topology();
        topology.replica_sets[1].is_config_server = true;
        let issues = topology.validate().unwrap_err();
        assert!(issues.contains(&ValidationIssue::ConfigServerCount { count: 2 }));
        // shard1 is now backed by a config server set
        assert!(issues.contains(&ValidationIssue::ConfigServerAsShard {
            shard: "shard1ReplSet".to_string(),
            replica_set: "shard1ReplSet".to_string(),
        }));
    }

    #[test]
    fn test_collects_every_issue() {
        let mut topology = reference_topology();
        topology.replica_sets[2].members.clear();
        topology.shards.push(ShardSpec::for_replica_set("shard3ReplSet"));
        topology.sharding_rules.push(ShardingRule::new(
            "db1",
            "events.logs",
            json!({ "_id": 1 }).as_object().unwrap().clone(),
        ));
        topology
            .sharding_rules
            .push(ShardingRule::new("db2", "users", ShardKey::new()));

        let issues = topology.validate().unwrap_err();
        assert_eq!(issues.len(), 4, "{issues:?}");
        assert!(issues.contains(&ValidationIssue::EmptyReplicaSet {
            name: "shard2ReplSet".to_string()
        }));
        assert!(issues.contains(&ValidationIssue::UnknownReplicaSet {
            shard: "shard3ReplSet".to_string(),
            replica_set: "shard3ReplSet".to_string(),
        }));
        assert!(issues.contains(&ValidationIssue::DuplicateRule {
            namespace: "db1.events.logs".to_string()
        }));
        assert!(issues.contains(&ValidationIssue::EmptyShardKey {
            namespace: "db2.users".to_string()
        }));
    }

    #[test]
    fn test_duplicate_member_address() {
        let mut topology = reference_topology();
        topology.replica_sets[2].members[0].host = "shard1".to_string();
        let issues = topology.validate().unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::DuplicateMember {
                address: "shard1:27017".to_string()
            }]
        );
    }

    #[test]
    fn test_replica_set_backs_one_shard() {
        let mut topology = reference_topology();
        topology.shards.push(ShardSpec {
            replica_set: "shard1ReplSet".to_string(),
            name: Some("east".to_string()),
            connection_seed: None,
        });
        let issues = topology.validate().unwrap_err();
        assert_eq!(
            issues,
            vec![ValidationIssue::DuplicateShardReplicaSet {
                replica_set: "shard1ReplSet".to_string()
            }]
        );
    }

    #[test]
    fn test_database_name_without_dots() {
        let key = json!({ "_id": 1 }).as_object().unwrap().clone();
        let mut topology = reference_topology();
        topology.sharding_rules = vec![
            ShardingRule::new("app.v2", "events", key.clone()),
            ShardingRule::new("my db", "events", key.clone()),
            ShardingRule::new("", "events", key),
        ];
        let issues = topology.validate().unwrap_err();
        assert_eq!(
            issues,
            vec![
                ValidationIssue::InvalidDatabaseName {
                    database: "app.v2".to_string()
                },
                ValidationIssue::InvalidDatabaseName {
                    database: "my db".to_string()
                },
                ValidationIssue::EmptyNamespace,
            ]
        );
    }

    #[test]
    fn test_sharded_databases_are_distinct() {
        let mut topology = reference_topology();
        let key = json!({ "ts": 1 }).as_object().unwrap().clone();
        topology
            .sharding_rules
            .push(ShardingRule::new("db1", "metrics", key.clone()));
        topology
            .sharding_rules
            .push(ShardingRule::new("db0", "audit", key));
        assert_eq!(topology.sharded_databases(), ["db1", "db0"]);
    }

    #[test]
    fn test_load_yaml_file() {
        let yaml = r#"
replicaSets:
  - name: configReplSet
    isConfigServer: true
    members:
      - host: configsvr
  - name: shard1ReplSet
    members:
      - host: shard1
        port: 27018
        priority: 2
shards:
  - replicaSet: shard1ReplSet
shardingRules:
  - database: db1
    collection: events.logs
    key: { _id: 1 }
"#;
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let topology = Topology::from_path(file.path()).unwrap();
        assert_eq!(topology.replica_sets.len(), 2);
        assert_eq!(topology.replica_sets[1].members[0].port, 27018);
        assert_eq!(topology.replica_sets[1].members[0].priority, 2.0);
        assert_eq!(topology.sharding_rules[0].namespace().to_string(), "db1.events.logs");
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn test_sample_descriptor_matches_reference() {
        let yaml = include_str!("../../../../deploy/topology.yaml");
        let topology = Topology::from_yaml(yaml).unwrap();
        assert_eq!(topology, reference_topology());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let err = Topology::from_path(file.path()).unwrap_err();
        assert!(matches!(err, TopologyError::UnsupportedFormat(ext) if ext == "toml"));
    }
}
