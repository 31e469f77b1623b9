//! Collection sharding rules

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Fully qualified collection name.
///
/// The database is everything before the first dot; the collection name may
/// itself contain dots (`db1.events.logs` is collection `events.logs`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(format!("invalid namespace '{s}', expected <database>.<collection>")),
        }
    }
}

/// Ordered shard key document, e.g. `{ "_id": 1 }` or `{ "tenant": 1, "ts": -1 }`.
pub type ShardKey = Map<String, Value>;

/// Desired sharding of one collection.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardingRule {
    pub database: String,
    pub collection: String,
    pub key: ShardKey,

    /// Enforce uniqueness on the shard key index.
    #[serde(default)]
    pub unique: bool,
}

impl ShardingRule {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, key: ShardKey) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            key,
            unique: false,
        }
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.database.clone(), self.collection.clone())
    }

    /// Fields whose direction is not `1`, `-1` or `"hashed"`.
    pub fn invalid_key_fields(&self) -> Vec<&str> {
        self.key
            .iter()
            .filter(|(_, direction)| !is_valid_direction(direction))
            .map(|(field, _)| field.as_str())
            .collect()
    }
}

fn is_valid_direction(value: &Value) -> bool {
    match value {
        Value::Number(n) => matches!(n.as_i64(), Some(1) | Some(-1)),
        Value::String(s) => s == "hashed",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_namespace_splits_on_first_dot() {
        let ns: Namespace = "db1.events.logs".parse().unwrap();
        assert_eq!(ns.database, "db1");
        assert_eq!(ns.collection, "events.logs");
        assert_eq!(ns.to_string(), "db1.events.logs");
    }

    #[test]
    fn test_namespace_rejects_bare_database() {
        assert!("db1".parse::<Namespace>().is_err());
        assert!(".coll".parse::<Namespace>().is_err());
        assert!("db1.".parse::<Namespace>().is_err());
    }

    #[test]
    fn test_key_order_preserved() {
        let rule: ShardingRule = serde_yaml::from_str(
            r#"
database: metrics
collection: samples
key:
  tenant: 1
  ts: -1
"#,
        )
        .unwrap();
        let fields: Vec<&String> = rule.key.keys().collect();
        assert_eq!(fields, ["tenant", "ts"]);
        assert!(!rule.unique);
    }

    #[test]
    fn test_invalid_key_fields() {
        let key = json!({ "_id": "hashed", "a": 1, "b": 2, "c": "text" });
        let rule = ShardingRule::new("db", "coll", key.as_object().unwrap().clone());
        assert_eq!(rule.invalid_key_fields(), ["b", "c"]);
    }
}
