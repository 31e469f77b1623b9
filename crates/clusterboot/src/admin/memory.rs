//! In-memory Admin Client
//!
//! A deterministic stand-in for a live cluster. Replica sets elect a primary
//! after a configurable number of status polls, the router refuses metadata
//! commands until a config-server set is initialized, and failures can be
//! injected per call kind. Every call is recorded for inspection.

use super::{codes, AdminClient, AdminError, MemberState, MemberStatus, ReplicaSetStatus};
use crate::topology::{Namespace, ReplicaSetSpec, ShardId, ShardKey};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::Mutex;

/// Kind of administrative call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum CallKind {
    InitiateReplicaSet,
    ReplicaSetStatus,
    AddShard,
    EnableSharding,
    ShardCollection,
    ListShards,
    ListShardingEnabledDatabases,
    ListShardedCollections,
}

impl CallKind {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            CallKind::InitiateReplicaSet
                | CallKind::AddShard
                | CallKind::EnableSharding
                | CallKind::ShardCollection
        )
    }
}

/// A recorded call. `target` is empty for list calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdminCall {
    pub kind: CallKind,
    pub target: String,
}

impl AdminCall {
    fn new(kind: CallKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
        }
    }
}

struct SimReplicaSet {
    spec: ReplicaSetSpec,
    polls_until_primary: u32,
    unreachable_polls: u32,
}

#[derive(Default)]
struct SimState {
    replica_sets: BTreeMap<String, SimReplicaSet>,
    shards: BTreeMap<ShardId, String>,
    enabled_databases: BTreeSet<String>,
    sharded_collections: BTreeMap<Namespace, ShardKey>,
    calls: Vec<AdminCall>,

    election_polls: u32,
    never_elect: BTreeSet<String>,
    unreachable_after_initiate: BTreeMap<String, u32>,
    transient_failures: HashMap<CallKind, u32>,
    key_conflicts: BTreeMap<Namespace, String>,
}

impl SimState {
    fn record(&mut self, kind: CallKind, target: impl Into<String>) -> Result<(), AdminError> {
        self.calls.push(AdminCall::new(kind, target));
        if let Some(remaining) = self.transient_failures.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AdminError::Transient(format!("injected {kind} failure")));
            }
        }
        Ok(())
    }

    fn require_router(&self) -> Result<(), AdminError> {
        let config_ready = self
            .replica_sets
            .values()
            .any(|rs| rs.spec.is_config_server);
        if config_ready {
            Ok(())
        } else {
            Err(AdminError::Transient(
                "router cannot reach config servers".to_string(),
            ))
        }
    }
}

/// Replica set name of a `name/host:port,...` seed.
fn seed_set_name(seed: &str) -> &str {
    seed.split_once('/').map_or(seed, |(name, _)| name)
}

/// Simulated cluster implementing [`AdminClient`].
pub struct InMemoryAdminClient {
    state: Mutex<SimState>,
}

impl Default for InMemoryAdminClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAdminClient {
    /// Empty cluster whose sets elect a primary on the first status poll after initiate.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                election_polls: 1,
                ..Default::default()
            }),
        }
    }

    /// Number of status polls after initiate before a primary is reported.
    pub fn elect_after_polls(mut self, polls: u32) -> Self {
        self.state.get_mut().election_polls = polls;
        self
    }

    /// The named set never reports a primary.
    pub fn never_elect(mut self, replica_set: impl Into<String>) -> Self {
        self.state.get_mut().never_elect.insert(replica_set.into());
        self
    }

    /// The named set refuses the first `polls` status calls after it is
    /// initiated, as a member restarting into its new config would.
    pub fn unreachable_after_initiate(
        mut self,
        replica_set: impl Into<String>,
        polls: u32,
    ) -> Self {
        self.state
            .get_mut()
            .unreachable_after_initiate
            .insert(replica_set.into(), polls);
        self
    }

    /// Fail the next `times` calls of `kind` with a transient error.
    pub fn fail_transiently(mut self, kind: CallKind, times: u32) -> Self {
        self.state.get_mut().transient_failures.insert(kind, times);
        self
    }

    /// Reject sharding `namespace` as incompatible with the requested key.
    pub fn reject_shard_key(mut self, namespace: Namespace, message: impl Into<String>) -> Self {
        self.state
            .get_mut()
            .key_conflicts
            .insert(namespace, message.into());
        self
    }

    /// Seed an already-initialized set with an elected primary.
    pub fn with_initialized_replica_set(mut self, spec: ReplicaSetSpec) -> Self {
        self.state.get_mut().replica_sets.insert(
            spec.name.clone(),
            SimReplicaSet {
                spec,
                polls_until_primary: 0,
                unreachable_polls: 0,
            },
        );
        self
    }

    pub fn with_shard(mut self, shard_id: impl Into<String>, seed: impl Into<String>) -> Self {
        self.state.get_mut().shards.insert(shard_id.into(), seed.into());
        self
    }

    pub fn with_sharding_enabled(mut self, database: impl Into<String>) -> Self {
        self.state.get_mut().enabled_databases.insert(database.into());
        self
    }

    pub fn with_sharded_collection(mut self, namespace: Namespace, key: ShardKey) -> Self {
        self.state
            .get_mut()
            .sharded_collections
            .insert(namespace, key);
        self
    }

    /// Every call issued so far, in order.
    pub async fn calls(&self) -> Vec<AdminCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn mutating_calls(&self) -> Vec<AdminCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.kind.is_mutating())
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Stop rejecting `namespace`, as an operator would after fixing the data.
    pub async fn resolve_shard_key_conflict(&self, namespace: &Namespace) {
        self.state.lock().await.key_conflicts.remove(namespace);
    }
}

#[async_trait]
impl AdminClient for InMemoryAdminClient {
    async fn initiate_replica_set(&self, spec: &ReplicaSetSpec) -> Result<(), AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::InitiateReplicaSet, spec.name.as_str())?;

        if state.replica_sets.contains_key(&spec.name) {
            return Err(AdminError::AlreadyInitialized(spec.name.clone()));
        }
        let polls_until_primary = state.election_polls;
        let unreachable_polls = state
            .unreachable_after_initiate
            .get(&spec.name)
            .copied()
            .unwrap_or(0);
        state.replica_sets.insert(
            spec.name.clone(),
            SimReplicaSet {
                spec: spec.clone(),
                polls_until_primary,
                unreachable_polls,
            },
        );
        Ok(())
    }

    async fn replica_set_status(
        &self,
        spec: &ReplicaSetSpec,
    ) -> Result<ReplicaSetStatus, AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::ReplicaSetStatus, spec.name.as_str())?;

        let never_elect = state.never_elect.contains(&spec.name);
        let Some(rs) = state.replica_sets.get_mut(&spec.name) else {
            return Ok(ReplicaSetStatus::uninitialized(spec.name.clone()));
        };
        if rs.unreachable_polls > 0 {
            rs.unreachable_polls -= 1;
            return Err(AdminError::Transient(format!(
                "connect ECONNREFUSED {}",
                rs.spec.seed_member().map(|m| m.address()).unwrap_or_default()
            )));
        }

        let elected = !never_elect && rs.polls_until_primary == 0;
        rs.polls_until_primary = rs.polls_until_primary.saturating_sub(1);

        let members = rs
            .spec
            .members
            .iter()
            .enumerate()
            .map(|(idx, m)| MemberStatus {
                host: m.address(),
                state: match (idx, elected) {
                    (0, true) => MemberState::Primary,
                    (_, true) => MemberState::Secondary,
                    _ => MemberState::Startup2,
                },
            })
            .collect();

        Ok(ReplicaSetStatus {
            name: spec.name.clone(),
            initialized: true,
            members,
        })
    }

    async fn add_shard(&self, shard_id: &str, connection_seed: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::AddShard, shard_id)?;
        state.require_router()?;

        let set_name = seed_set_name(connection_seed);
        if !state.replica_sets.contains_key(set_name) {
            return Err(AdminError::from_server(
                96,
                "OperationFailed",
                format!("replica set {set_name} is not initialized"),
            ));
        }
        if let Some((existing, _)) = state
            .shards
            .iter()
            .find(|(id, seed)| id.as_str() != shard_id && seed_set_name(seed) == set_name)
        {
            return Err(AdminError::from_server(
                96,
                "OperationFailed",
                format!("replica set {set_name} is already a member of shard {existing}"),
            ));
        }
        state
            .shards
            .insert(shard_id.to_string(), connection_seed.to_string());
        Ok(())
    }

    async fn enable_sharding(&self, database: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::EnableSharding, database)?;
        state.require_router()?;
        state.enabled_databases.insert(database.to_string());
        Ok(())
    }

    async fn shard_collection(
        &self,
        namespace: &Namespace,
        key: &ShardKey,
        _unique: bool,
    ) -> Result<(), AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::ShardCollection, namespace.to_string())?;
        state.require_router()?;

        if !state.enabled_databases.contains(&namespace.database) {
            return Err(AdminError::from_server(
                20,
                "IllegalOperation",
                format!("sharding not enabled for db {}", namespace.database),
            ));
        }
        if let Some(message) = state.key_conflicts.get(namespace) {
            return Err(AdminError::from_server(72, "InvalidOptions", message.clone()));
        }
        if let Some(existing) = state.sharded_collections.get(namespace) {
            if existing != key {
                return Err(AdminError::from_server(
                    codes::ALREADY_INITIALIZED,
                    "AlreadyInitialized",
                    format!("{namespace} is already sharded with a different key"),
                ));
            }
        }
        state.sharded_collections.insert(namespace.clone(), key.clone());
        Ok(())
    }

    async fn list_shards(&self) -> Result<BTreeSet<ShardId>, AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::ListShards, "")?;
        state.require_router()?;
        Ok(state.shards.keys().cloned().collect())
    }

    async fn list_sharding_enabled_databases(&self) -> Result<BTreeSet<String>, AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::ListShardingEnabledDatabases, "")?;
        state.require_router()?;
        Ok(state.enabled_databases.clone())
    }

    async fn list_sharded_collections(&self) -> Result<BTreeSet<Namespace>, AdminError> {
        let mut state = self.state.lock().await;
        state.record(CallKind::ListShardedCollections, "")?;
        state.require_router()?;
        Ok(state.sharded_collections.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MemberSpec;

    fn set(name: &str, config: bool) -> ReplicaSetSpec {
        ReplicaSetSpec {
            name: name.to_string(),
            is_config_server: config,
            members: vec![
                MemberSpec::new(name, 27017),
                MemberSpec::new(format!("{name}-b"), 27017),
            ],
        }
    }

    #[tokio::test]
    async fn test_election_after_polls() {
        let client = InMemoryAdminClient::new().elect_after_polls(2);
        let rs = set("rs0", false);

        assert!(!client.replica_set_status(&rs).await.unwrap().initialized);
        client.initiate_replica_set(&rs).await.unwrap();

        assert!(!client.replica_set_status(&rs).await.unwrap().has_stable_primary());
        assert!(!client.replica_set_status(&rs).await.unwrap().has_stable_primary());
        let status = client.replica_set_status(&rs).await.unwrap();
        assert_eq!(status.primary(), Some("rs0:27017"));
        assert_eq!(status.members[1].state, MemberState::Secondary);
    }

    #[tokio::test]
    async fn test_initiate_twice_is_rejected() {
        let client = InMemoryAdminClient::new();
        let rs = set("rs0", false);
        client.initiate_replica_set(&rs).await.unwrap();
        let err = client.initiate_replica_set(&rs).await.unwrap_err();
        assert!(matches!(err, AdminError::AlreadyInitialized(name) if name == "rs0"));
    }

    #[tokio::test]
    async fn test_router_requires_config_server() {
        let client = InMemoryAdminClient::new();
        assert!(client.list_shards().await.unwrap_err().is_transient());

        client.initiate_replica_set(&set("cfg", true)).await.unwrap();
        assert!(client.list_shards().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_transient_failures_are_recorded() {
        let client = InMemoryAdminClient::new()
            .with_initialized_replica_set(set("cfg", true))
            .fail_transiently(CallKind::EnableSharding, 1);

        assert!(client.enable_sharding("db1").await.unwrap_err().is_transient());
        client.enable_sharding("db1").await.unwrap();

        let calls = client.mutating_calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.kind == CallKind::EnableSharding && c.target == "db1"));
        assert_eq!(
            client.list_sharding_enabled_databases().await.unwrap(),
            BTreeSet::from(["db1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_add_shard_requires_initialized_set() {
        let client = InMemoryAdminClient::new().with_initialized_replica_set(set("cfg", true));
        let err = client
            .add_shard("rs1", "rs1/rs1:27017")
            .await
            .unwrap_err();
        assert!(matches!(err, AdminError::Command { code: 96, .. }));
    }

    #[tokio::test]
    async fn test_set_backs_at_most_one_shard() {
        let client = InMemoryAdminClient::new()
            .with_initialized_replica_set(set("cfg", true))
            .with_initialized_replica_set(set("rs1", false));

        client.add_shard("rs1", "rs1/rs1:27017").await.unwrap();
        client.add_shard("rs1", "rs1/rs1:27017").await.unwrap();
        let err = client
            .add_shard("east", "rs1/rs1:27017,rs1-b:27017")
            .await
            .unwrap_err();

        assert!(matches!(err, AdminError::Command { code: 96, ref message, .. }
            if message.contains("already a member of shard rs1")));
        assert_eq!(
            client.list_shards().await.unwrap(),
            BTreeSet::from(["rs1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_unreachable_after_initiate() {
        let client = InMemoryAdminClient::new().unreachable_after_initiate("rs0", 2);
        let rs = set("rs0", false);

        assert!(!client.replica_set_status(&rs).await.unwrap().initialized);
        client.initiate_replica_set(&rs).await.unwrap();

        for _ in 0..2 {
            let err = client.replica_set_status(&rs).await.unwrap_err();
            assert!(err.is_transient());
            assert!(err.to_string().contains("ECONNREFUSED rs0:27017"));
        }
        assert!(client.replica_set_status(&rs).await.unwrap().initialized);
    }
}
