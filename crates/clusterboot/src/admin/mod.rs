//! Admin Client
//!
//! The administrative surface of the cluster as seen by the reconciler. The
//! reconciler only talks to the cluster through [`AdminClient`]; the
//! replication and routing machinery behind it is opaque.
//!
//! Implementations:
//! - [`MongoShellClient`]: drives a live cluster through `mongosh`
//! - [`InMemoryAdminClient`]: deterministic simulated cluster

pub mod memory;
pub mod mongosh;

pub use memory::{AdminCall, CallKind, InMemoryAdminClient};
pub use mongosh::{MongoShellClient, MongoShellConfig};

use crate::topology::{Namespace, ReplicaSetSpec, ShardId, ShardKey};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Server error codes that indicate a transient condition.
pub mod codes {
    pub const HOST_UNREACHABLE: i32 = 6;
    pub const HOST_NOT_FOUND: i32 = 7;
    pub const ALREADY_INITIALIZED: i32 = 23;
    pub const NETWORK_TIMEOUT: i32 = 89;
    pub const SHUTDOWN_IN_PROGRESS: i32 = 91;
    pub const NOT_YET_INITIALIZED: i32 = 94;
    pub const FAILED_TO_SATISFY_READ_PREFERENCE: i32 = 133;
    pub const PRIMARY_STEPPED_DOWN: i32 = 189;
    pub const EXCEEDED_TIME_LIMIT: i32 = 262;
    pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
    pub const INTERRUPTED_DUE_TO_REPL_STATE_CHANGE: i32 = 11602;
    pub const NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;

    pub const TRANSIENT: &[i32] = &[
        HOST_UNREACHABLE,
        HOST_NOT_FOUND,
        NETWORK_TIMEOUT,
        SHUTDOWN_IN_PROGRESS,
        FAILED_TO_SATISFY_READ_PREFERENCE,
        PRIMARY_STEPPED_DOWN,
        EXCEEDED_TIME_LIMIT,
        NOT_WRITABLE_PRIMARY,
        INTERRUPTED_DUE_TO_REPL_STATE_CHANGE,
        NOT_PRIMARY_NO_SECONDARY_OK,
    ];
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("transient connectivity error: {0}")]
    Transient(String),
    #[error("replica set '{0}' is already initialized")]
    AlreadyInitialized(String),
    #[error("command rejected ({code_name}, code {code}): {message}")]
    Command {
        code: i32,
        code_name: String,
        message: String,
    },
    #[error("failed to launch admin shell: {0}")]
    Launch(#[source] std::io::Error),
    #[error("malformed admin response: {0}")]
    Protocol(String),
}

impl AdminError {
    /// Build an error from a server `{code, codeName, errmsg}` triple.
    pub fn from_server(
        code: i32,
        code_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        if codes::TRANSIENT.contains(&code) {
            AdminError::Transient(message)
        } else {
            AdminError::Command {
                code,
                code_name: code_name.into(),
                message,
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdminError::Transient(_))
    }
}

/// Replica set member state as reported by the set's status command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MemberState {
    Primary,
    Secondary,
    Startup,
    Startup2,
    Recovering,
    Arbiter,
    Down,
    Rollback,
    Removed,
    Unknown,
}

impl MemberState {
    pub fn from_state_str(s: &str) -> Self {
        match s {
            "PRIMARY" => MemberState::Primary,
            "SECONDARY" => MemberState::Secondary,
            "STARTUP" => MemberState::Startup,
            "STARTUP2" => MemberState::Startup2,
            "RECOVERING" => MemberState::Recovering,
            "ARBITER" => MemberState::Arbiter,
            "DOWN" => MemberState::Down,
            "ROLLBACK" => MemberState::Rollback,
            "REMOVED" => MemberState::Removed,
            _ => MemberState::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberStatus {
    pub host: String,
    pub state: MemberState,
}

/// Observed status of one replica set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReplicaSetStatus {
    pub name: String,
    pub initialized: bool,
    pub members: Vec<MemberStatus>,
}

impl ReplicaSetStatus {
    pub fn uninitialized(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initialized: false,
            members: Vec::new(),
        }
    }

    /// Host of the primary, if exactly one member reports `PRIMARY`.
    pub fn primary(&self) -> Option<&str> {
        let mut primaries = self
            .members
            .iter()
            .filter(|m| m.state == MemberState::Primary);
        match (primaries.next(), primaries.next()) {
            (Some(p), None) => Some(p.host.as_str()),
            _ => None,
        }
    }

    pub fn has_stable_primary(&self) -> bool {
        self.initialized && self.primary().is_some()
    }

    /// Short human-readable summary, e.g. `shard1:27017=SECONDARY`.
    pub fn summary(&self) -> String {
        if !self.initialized {
            return "not initialized".to_string();
        }
        if self.members.is_empty() {
            return "no members reported".to_string();
        }
        self.members
            .iter()
            .map(|m| format!("{}={}", m.host, m.state))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Administrative operations consumed by the reconciler.
///
/// Every call is awaited to completion before the next step is issued.
#[async_trait]
pub trait AdminClient: Send + Sync {
    async fn initiate_replica_set(&self, spec: &ReplicaSetSpec) -> Result<(), AdminError>;

    /// Not-yet-initialized sets are reported as `initialized: false`, not as an error.
    async fn replica_set_status(&self, spec: &ReplicaSetSpec)
        -> Result<ReplicaSetStatus, AdminError>;

    async fn add_shard(&self, shard_id: &str, connection_seed: &str) -> Result<(), AdminError>;

    async fn enable_sharding(&self, database: &str) -> Result<(), AdminError>;

    async fn shard_collection(
        &self,
        namespace: &Namespace,
        key: &ShardKey,
        unique: bool,
    ) -> Result<(), AdminError>;

    async fn list_shards(&self) -> Result<BTreeSet<ShardId>, AdminError>;

    async fn list_sharding_enabled_databases(&self) -> Result<BTreeSet<String>, AdminError>;

    async fn list_sharded_collections(&self) -> Result<BTreeSet<Namespace>, AdminError>;
}
