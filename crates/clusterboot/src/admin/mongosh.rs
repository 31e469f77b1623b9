//! mongosh-backed Admin Client
//!
//! Each administrative call evaluates a short script with `mongosh --eval`.
//! The script prints one line prefixed with [`RESULT_MARKER`] holding a JSON
//! envelope, either `{ok: 1, result}` or `{ok: 0, code, codeName, errmsg}`,
//! so shell banners and warnings on stdout are ignored.
//!
//! Replica set commands go straight to the set's first member
//! (`directConnection=true`); sharding commands go to the router.

use super::{codes, AdminClient, AdminError, MemberState, MemberStatus, ReplicaSetStatus};
use crate::topology::{Namespace, ReplicaSetSpec, ShardId, ShardKey};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Prefix of the stdout line carrying the response envelope.
pub const RESULT_MARKER: &str = "CLUSTERBOOT_RESULT ";

/// Output fragments that identify a network-level failure of the shell itself.
const NETWORK_FAILURE_HINTS: &[&str] = &[
    "ECONNREFUSED",
    "ECONNRESET",
    "ENOTFOUND",
    "EHOSTUNREACH",
    "MongoNetworkError",
    "MongoServerSelectionError",
    "MongoNetworkTimeoutError",
];

/// Shell client configuration.
#[derive(Debug, Clone)]
pub struct MongoShellConfig {
    /// Path to the `mongosh` binary (env: CLUSTERBOOT_MONGOSH)
    pub binary: PathBuf,

    /// Router connection string (env: CLUSTERBOOT_ROUTER)
    pub router_uri: String,

    /// Upper bound on a single shell invocation (env: CLUSTERBOOT_COMMAND_TIMEOUT_SECS)
    pub command_timeout: Duration,

    /// Extra arguments passed to every invocation, e.g. TLS options
    pub extra_args: Vec<String>,
}

impl Default for MongoShellConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mongosh"),
            router_uri: "mongodb://localhost:27017".to_string(),
            command_timeout: Duration::from_secs(30),
            extra_args: Vec::new(),
        }
    }
}

impl MongoShellConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(binary) = std::env::var("CLUSTERBOOT_MONGOSH") {
            config.binary = PathBuf::from(binary);
        }

        if let Ok(router) = std::env::var("CLUSTERBOOT_ROUTER") {
            config.router_uri = router;
        }

        if let Ok(secs) = std::env::var("CLUSTERBOOT_COMMAND_TIMEOUT_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.command_timeout = Duration::from_secs(parsed);
            }
        }

        config
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ok: i32,
    #[serde(default)]
    result: Value,
    code: Option<i32>,
    code_name: Option<String>,
    errmsg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusDoc {
    set: String,
    members: Vec<MemberDoc>,
}

#[derive(Debug, Deserialize)]
struct MemberDoc {
    name: String,
    state: String,
}

/// Admin client that shells out to `mongosh`.
pub struct MongoShellClient {
    config: MongoShellConfig,
}

impl MongoShellClient {
    pub fn new(config: MongoShellConfig) -> Self {
        Self { config }
    }

    fn member_uri(spec: &ReplicaSetSpec) -> Result<String, AdminError> {
        let member = spec.seed_member().ok_or_else(|| {
            AdminError::Protocol(format!("replica set '{}' has no members", spec.name))
        })?;
        Ok(format!("mongodb://{}/?directConnection=true", member.address()))
    }

    async fn eval(&self, uri: &str, body: &str) -> Result<Value, AdminError> {
        let script = wrap_script(body);
        trace!(uri = %uri, script = %script, "Evaluating admin script");

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("--quiet")
            .arg("--norc")
            .args(&self.config.extra_args)
            .arg(uri)
            .arg("--eval")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.config.command_timeout, cmd.output())
            .await
            .map_err(|_| {
                AdminError::Transient(format!(
                    "admin command against {uri} timed out after {:?}",
                    self.config.command_timeout
                ))
            })?
            .map_err(AdminError::Launch)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(uri = %uri, status = %output.status, "Admin shell exited");

        parse_output(&stdout, &stderr)
    }

    async fn router_command(&self, command: Value) -> Result<Value, AdminError> {
        self.eval(&self.config.router_uri, &command_body(&command))
            .await
    }
}

/// Wrap an expression so that its outcome is printed as a marked envelope.
fn wrap_script(body: &str) -> String {
    format!(
        r#"(() => {{
  const emit = (doc) => print("{marker}" + JSON.stringify(doc));
  try {{
    const r = ({body});
    if (r && typeof r === "object" && r.ok === 0) {{
      emit({{ ok: 0, code: r.code ?? null, codeName: r.codeName ?? null, errmsg: String(r.errmsg ?? "command failed") }});
    }} else {{
      emit({{ ok: 1, result: r ?? null }});
    }}
  }} catch (e) {{
    emit({{ ok: 0, code: e.code ?? null, codeName: e.codeName ?? null, errmsg: String(e.message ?? e) }});
  }}
}})();"#,
        marker = RESULT_MARKER,
        body = body
    )
}

/// An admin command whose success collapses to `true`, keeping cluster-time
/// metadata out of the envelope.
fn command_body(command: &Value) -> String {
    format!("((r) => r.ok === 1 ? true : r)(db.adminCommand({command}))")
}

fn initiate_document(spec: &ReplicaSetSpec) -> Value {
    let members: Vec<Value> = spec
        .members
        .iter()
        .enumerate()
        .map(|(idx, m)| json!({ "_id": idx, "host": m.address(), "priority": m.priority }))
        .collect();

    let mut doc = json!({ "_id": spec.name, "members": members });
    if spec.is_config_server {
        doc["configsvr"] = Value::Bool(true);
    }
    doc
}

fn parse_output(stdout: &str, stderr: &str) -> Result<Value, AdminError> {
    let envelope_line = stdout
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(RESULT_MARKER.trim_end()))
        .map(str::trim);

    let Some(line) = envelope_line else {
        let combined = format!("{stdout}\n{stderr}");
        let detail = first_meaningful_line(stderr)
            .or_else(|| first_meaningful_line(stdout))
            .unwrap_or("no output")
            .to_string();
        if NETWORK_FAILURE_HINTS.iter().any(|h| combined.contains(h)) {
            return Err(AdminError::Transient(detail));
        }
        return Err(AdminError::Protocol(detail));
    };

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AdminError::Protocol(format!("undecodable envelope: {e}")))?;

    if envelope.ok == 1 {
        return Ok(envelope.result);
    }

    let message = envelope
        .errmsg
        .unwrap_or_else(|| "command failed".to_string());
    match envelope.code {
        Some(code) => Err(AdminError::from_server(
            code,
            envelope.code_name.unwrap_or_default(),
            message,
        )),
        None if NETWORK_FAILURE_HINTS.iter().any(|h| message.contains(h)) => {
            Err(AdminError::Transient(message))
        }
        None => Err(AdminError::Protocol(message)),
    }
}

fn first_meaningful_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|l| !l.is_empty())
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, AdminError> {
    serde_json::from_value(value).map_err(|e| AdminError::Protocol(e.to_string()))
}

#[async_trait]
impl AdminClient for MongoShellClient {
    async fn initiate_replica_set(&self, spec: &ReplicaSetSpec) -> Result<(), AdminError> {
        let uri = Self::member_uri(spec)?;
        let command = json!({ "replSetInitiate": initiate_document(spec) });
        match self.eval(&uri, &command_body(&command)).await {
            Ok(_) => Ok(()),
            Err(AdminError::Command {
                code: codes::ALREADY_INITIALIZED,
                ..
            }) => Err(AdminError::AlreadyInitialized(spec.name.clone())),
            Err(e) => Err(e),
        }
    }

    async fn replica_set_status(
        &self,
        spec: &ReplicaSetSpec,
    ) -> Result<ReplicaSetStatus, AdminError> {
        let uri = Self::member_uri(spec)?;
        let body = r#"((s) => s.ok !== 1 ? s : { set: s.set, members: s.members.map((m) => ({ name: m.name, state: m.stateStr })) })(db.adminCommand({ replSetGetStatus: 1 }))"#;

        let doc: StatusDoc = match self.eval(&uri, body).await {
            Ok(value) => decode(value)?,
            Err(AdminError::Command {
                code: codes::NOT_YET_INITIALIZED,
                ..
            }) => return Ok(ReplicaSetStatus::uninitialized(spec.name.clone())),
            Err(e) => return Err(e),
        };

        if doc.set != spec.name {
            return Err(AdminError::Protocol(format!(
                "member {uri} belongs to replica set '{}', expected '{}'",
                doc.set, spec.name
            )));
        }

        Ok(ReplicaSetStatus {
            name: doc.set,
            initialized: true,
            members: doc
                .members
                .into_iter()
                .map(|m| MemberStatus {
                    host: m.name,
                    state: MemberState::from_state_str(&m.state),
                })
                .collect(),
        })
    }

    async fn add_shard(&self, shard_id: &str, connection_seed: &str) -> Result<(), AdminError> {
        self.router_command(json!({ "addShard": connection_seed, "name": shard_id }))
            .await
            .map(|_| ())
    }

    async fn enable_sharding(&self, database: &str) -> Result<(), AdminError> {
        self.router_command(json!({ "enableSharding": database }))
            .await
            .map(|_| ())
    }

    async fn shard_collection(
        &self,
        namespace: &Namespace,
        key: &ShardKey,
        unique: bool,
    ) -> Result<(), AdminError> {
        self.router_command(json!({
            "shardCollection": namespace.to_string(),
            "key": key,
            "unique": unique,
        }))
        .await
        .map(|_| ())
    }

    async fn list_shards(&self) -> Result<BTreeSet<ShardId>, AdminError> {
        let body = "((r) => r.ok === 1 ? r.shards.map((s) => s._id) : r)(db.adminCommand({ listShards: 1 }))";
        let ids: Vec<String> = decode(self.eval(&self.config.router_uri, body).await?)?;
        Ok(ids.into_iter().collect())
    }

    async fn list_sharding_enabled_databases(&self) -> Result<BTreeSet<String>, AdminError> {
        // Newer servers drop `partitioned`; every registered database is shardable there.
        let body = r#"db.getSiblingDB("config").databases.find({}, { _id: 1, partitioned: 1 }).toArray().filter((d) => d.partitioned !== false).map((d) => d._id)"#;
        let names: Vec<String> = decode(self.eval(&self.config.router_uri, body).await?)?;
        Ok(names.into_iter().collect())
    }

    async fn list_sharded_collections(&self) -> Result<BTreeSet<Namespace>, AdminError> {
        let body = r#"db.getSiblingDB("config").collections.find({ dropped: { $ne: true } }, { _id: 1 }).toArray().map((c) => c._id)"#;
        let names: Vec<String> = decode(self.eval(&self.config.router_uri, body).await?)?;

        Ok(names
            .into_iter()
            .filter_map(|name| match name.parse::<Namespace>() {
                Ok(ns) => Some(ns),
                Err(e) => {
                    warn!(error = %e, "Ignoring unparseable sharded collection");
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MemberSpec;

    fn envelope(json: &str) -> String {
        format!("Current Mongosh Log ID: 0123\n{RESULT_MARKER}{json}\n")
    }

    #[test]
    fn test_initiate_document_matches_shell_form() {
        let spec = ReplicaSetSpec {
            name: "configReplSet".to_string(),
            is_config_server: true,
            members: vec![MemberSpec::new("configsvr", 27017)],
        };
        let doc = initiate_document(&spec);
        assert_eq!(
            doc,
            json!({
                "_id": "configReplSet",
                "members": [{ "_id": 0, "host": "configsvr:27017", "priority": 1.0 }],
                "configsvr": true
            })
        );

        let mut shard = spec.clone();
        shard.is_config_server = false;
        assert!(initiate_document(&shard).get("configsvr").is_none());
    }

    #[test]
    fn test_wrapped_script_contains_body_and_marker() {
        let script = wrap_script(&command_body(&json!({ "enableSharding": "db1" })));
        assert!(script.contains(r#"db.adminCommand({"enableSharding":"db1"})"#));
        assert!(script.contains(RESULT_MARKER));
    }

    #[test]
    fn test_parse_success() {
        let value = parse_output(&envelope(r#"{"ok":1,"result":["shard1ReplSet"]}"#), "").unwrap();
        assert_eq!(value, json!(["shard1ReplSet"]));
    }

    #[test]
    fn test_parse_server_errors() {
        let err = parse_output(
            &envelope(r#"{"ok":0,"code":94,"codeName":"NotYetInitialized","errmsg":"no replset config has been received"}"#),
            "",
        )
        .unwrap_err();
        assert!(matches!(err, AdminError::Command { code: 94, .. }));

        let err = parse_output(
            &envelope(r#"{"ok":0,"code":10107,"codeName":"NotWritablePrimary","errmsg":"not primary"}"#),
            "",
        )
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_parse_connection_refused_without_envelope() {
        let err = parse_output(
            "",
            "MongoNetworkError: connect ECONNREFUSED 127.0.0.1:27017\n",
        )
        .unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("ECONNREFUSED"));
    }

    #[test]
    fn test_parse_garbage_is_protocol_error() {
        let err = parse_output("SyntaxError: unexpected token", "").unwrap_err();
        assert!(matches!(err, AdminError::Protocol(msg) if msg.starts_with("SyntaxError")));
    }

    #[test]
    fn test_member_uri_uses_direct_connection() {
        let spec = ReplicaSetSpec {
            name: "shard1ReplSet".to_string(),
            is_config_server: false,
            members: vec![MemberSpec::new("shard1", 27018)],
        };
        assert_eq!(
            MongoShellClient::member_uri(&spec).unwrap(),
            "mongodb://shard1:27018/?directConnection=true"
        );
    }
}
