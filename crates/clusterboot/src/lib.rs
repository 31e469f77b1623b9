//! clusterboot
//!
//! Bootstraps a sharded database cluster from a declarative topology
//! descriptor: replica sets are initiated and brought to a primary, shards
//! are registered with the router, and sharding is enabled for the declared
//! databases and collections.
//!
//! Every run is idempotent. The reconciler observes the live cluster first and
//! only issues the commands still missing, so it can be re-run after any
//! failure and picks up where the previous run stopped.

pub mod admin;
pub mod config;
pub mod observability;
pub mod reconciler;
pub mod topology;
pub mod version;

pub use admin::{AdminClient, AdminError, InMemoryAdminClient, MongoShellClient, MongoShellConfig};
pub use config::ReconcilerConfig;
pub use reconciler::{
    CancelHandle, CancelSignal, Plan, ReconcileError, ReconcileFailure, Reconciler, Report,
};
pub use topology::{Topology, TopologyError, ValidationIssue};
