//! Replica Harness - convergence checks for a primary and its read replicas
//!
//! This crate provides:
//! - A narrow data-access trait over a single store endpoint
//! - A perpetual write generator feeding the primary
//! - A single-permit exclusion gate that lets a check halt the generator
//! - A replica set that follows nodes being stopped and restarted
//! - A checker that compares per-node row counts once replication settles

pub mod checker;
pub mod config;
pub mod error;
pub mod gate;
pub mod generator;
pub mod lifecycle;
pub mod node;
pub mod replica_set;
pub mod sink;

#[cfg(test)]
mod tests;

pub use checker::{CheckerConfig, ConsistencyChecker, Observed, Settle, Verdict, VerdictKind};
pub use config::{HarnessConfig, SettleStrategy};
pub use error::{
    ExecutionError, ExecutionErrorKind, GateMisuseError, HarnessError, Result, TopologyError,
};
pub use gate::{ExclusionGate, GatePermit};
pub use generator::{GeneratorConfig, GeneratorHandle, GeneratorStats, TickOutcome, WriteGenerator};
pub use lifecycle::{NodeLifecycle, Topology};
pub use node::{DataNode, Row, Value};
pub use replica_set::{NodeRef, ReplicaSet};
pub use sink::{EventSink, MarkdownReport, NullSink, Tee, TracingSink};

/// Default time between generator inserts
pub const WRITE_INTERVAL_MS: u64 = 100;

/// Default quiescence window before counts are read
pub const SETTLE_MS: u64 = 1000;

/// Default comparison query
pub const DEFAULT_COUNT_SQL: &str = "SELECT COUNT(*) FROM test.users";

/// Default insert template
pub const DEFAULT_INSERT_SQL: &str = "INSERT INTO test.users (name) VALUES ('{value}')";
