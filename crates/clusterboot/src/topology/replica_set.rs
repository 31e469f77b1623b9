//! Replica set descriptors
//!
//! Defines the desired membership of a replica set. A topology carries exactly
//! one config-server set and any number of shard data sets.

use serde::{Deserialize, Serialize};

/// Desired replica set: identity, role, and ordered member list.
///
/// Members are sent to the cluster in declaration order; each member's
/// `_id` in the initiate document is its index in `members`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSetSpec {
    /// Replica set name (`_id` of the replica set config).
    pub name: String,

    /// Whether this set stores cluster metadata for the router layer.
    #[serde(default)]
    pub is_config_server: bool,

    /// Ordered member list. Must not be empty.
    pub members: Vec<MemberSpec>,
}

impl ReplicaSetSpec {
    /// Member addresses as `host:port`, in declaration order.
    pub fn hosts(&self) -> Vec<String> {
        self.members.iter().map(MemberSpec::address).collect()
    }

    /// The member used as the entry point for replica set commands.
    pub fn seed_member(&self) -> Option<&MemberSpec> {
        self.members.first()
    }

    /// Connection seed in the `<set>/<host:port>,...` form understood by the router.
    pub fn connection_seed(&self) -> String {
        format!("{}/{}", self.name, self.hosts().join(","))
    }
}

/// A single replica set member.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberSpec {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Election priority. `0` makes the member ineligible for primary.
    #[serde(default = "default_priority")]
    pub priority: f64,
}

fn default_port() -> u16 {
    27017
}

fn default_priority() -> f64 {
    1.0
}

impl MemberSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            priority: default_priority(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
