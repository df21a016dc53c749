//! Sim Cluster - an in-process replicated store for exercising the harness
//!
//! Each node is an in-memory SQLite database with an attached `test` schema.
//! The primary records every mutating statement in a shared log and each
//! replica's applier replays it after a configurable lag:
//! - MySQL-style replication control (`START REPLICA`, `CHANGE REPLICATION SOURCE TO ...`)
//! - Status rows (`SHOW PRIMARY STATUS`, `SHOW REPLICA STATUS`)
//! - Start/stop lifecycle with catch-up on restart
//! - Read-only replicas that refuse unprivileged writes

pub mod applier;
pub mod binlog;
pub mod cluster;
pub mod dialect;
pub mod error;
pub mod node;


pub use applier::ApplierConfig;
pub use binlog::{LogEntry, StatementLog, LOG_FILE};
pub use cluster::{ReplicaOptions, SimCluster, SimClusterBuilder};
pub use error::SimError;
pub use node::{ReplicationState, SimNode};
