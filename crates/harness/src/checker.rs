//! Consistency checker - halts writes, lets replication settle, compares row counts

use crate::error::{ExecutionError, HarnessError, Result};
use crate::gate::ExclusionGate;
use crate::replica_set::{NodeRef, ReplicaSet};
use crate::sink::EventSink;
use crate::{DEFAULT_COUNT_SQL, SETTLE_MS};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the checker waits for replication to catch up once writes are halted
#[derive(Debug, Clone, PartialEq)]
pub enum Settle {
    /// Sleep for a fixed duration
    Fixed(Duration),
    /// Poll each node's replication lag until all report zero.
    /// Falls back to sleeping `fallback` if any node cannot report lag.
    LagProbe {
        poll: Duration,
        timeout: Duration,
        fallback: Duration,
    },
}

impl Default for Settle {
    fn default() -> Self {
        Settle::Fixed(Duration::from_millis(SETTLE_MS))
    }
}

/// Checker configuration
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub settle: Settle,
    /// Scalar query returning the comparison count on every node
    pub count_sql: String,
}

impl CheckerConfig {
    pub fn with_settle(mut self, settle: Settle) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_count_sql(mut self, sql: impl Into<String>) -> Self {
        self.count_sql = sql.into();
        self
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            settle: Settle::default(),
            count_sql: DEFAULT_COUNT_SQL.to_string(),
        }
    }
}

/// What a node reported during a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Observed {
    Count(u64),
    /// The node could not be queried; carries the failure text
    Absent(String),
}

impl Observed {
    pub fn count(&self) -> Option<u64> {
        match self {
            Observed::Count(n) => Some(*n),
            Observed::Absent(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerdictKind {
    /// Every answering node reported the same count
    Converged,
    /// At least two answering nodes disagree
    Diverged,
    /// Fewer than two nodes answered
    Inconclusive,
}

/// Outcome of one consistency check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub kind: VerdictKind,
    /// Per-node observations in check order
    pub observed: Vec<(String, Observed)>,
}

impl Verdict {
    /// Classify a set of observations
    pub fn from_observations(observed: Vec<(String, Observed)>) -> Self {
        let counts: Vec<u64> = observed.iter().filter_map(|(_, o)| o.count()).collect();
        let kind = match counts.split_first() {
            _ if counts.len() < 2 => VerdictKind::Inconclusive,
            Some((first, rest)) if rest.iter().all(|c| c == first) => VerdictKind::Converged,
            _ => VerdictKind::Diverged,
        };
        Self { kind, observed }
    }

    pub fn is_converged(&self) -> bool {
        self.kind == VerdictKind::Converged
    }

    /// Count reported by a node, if it answered
    pub fn count(&self, node: &str) -> Option<u64> {
        self.observed
            .iter()
            .find(|(name, _)| name == node)
            .and_then(|(_, o)| o.count())
    }

    /// Nodes that answered, with their counts
    pub fn counts(&self) -> Vec<(&str, u64)> {
        self.observed
            .iter()
            .filter_map(|(name, o)| o.count().map(|c| (name.as_str(), c)))
            .collect()
    }

    /// Nodes that could not be queried
    pub fn absent(&self) -> Vec<&str> {
        self.observed
            .iter()
            .filter(|(_, o)| o.count().is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// One-line human summary
    pub fn summary(&self) -> &'static str {
        match self.kind {
            VerdictKind::Converged => "Replica data is in sync",
            VerdictKind::Diverged => "**Replica data is not in sync**",
            VerdictKind::Inconclusive => "Not enough nodes answered to compare (inconclusive)",
        }
    }
}

/// Runs consistency checks against a replica set
pub struct ConsistencyChecker {
    replicas: ReplicaSet,
    gate: ExclusionGate,
    config: CheckerConfig,
    sink: Arc<dyn EventSink>,
}

impl ConsistencyChecker {
    pub fn new(
        replicas: ReplicaSet,
        gate: ExclusionGate,
        config: CheckerConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            replicas,
            gate,
            config,
            sink,
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Check every current member of the replica set
    pub async fn check_all(&self) -> Result<Verdict> {
        let names = self.replicas.names();
        self.check_consistency(&names).await
    }

    /// Compare row counts across the named nodes
    ///
    /// Writes are halted for the whole window. Names that are not members of
    /// the replica set at query time are left out; nodes that fail to answer
    /// are recorded as absent. The gate is released on every exit path,
    /// including a panicking node.
    pub async fn check_consistency<S: AsRef<str>>(&self, node_names: &[S]) -> Result<Verdict> {
        let mut seen = HashSet::new();
        let requested: Vec<&str> = node_names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| seen.insert(*n))
            .collect();

        let permit = self.gate.acquire().await;
        tracing::debug!("Writes halted for consistency check of {:?}", requested);
        self.sink.line("Checking replica data:");

        self.settle(&self.targets(&requested)).await;

        let targets = self.targets(&requested);
        let queries = targets.iter().map(|(name, node)| async move {
            let observed = match node.query_scalar(&self.config.count_sql).await {
                Ok(value) => match value.as_count() {
                    Some(count) => Observed::Count(count),
                    None => Observed::Absent(
                        ExecutionError::shape_mismatch(
                            name,
                            &self.config.count_sql,
                            format!("not a row count: {}", value),
                        )
                        .to_string(),
                    ),
                },
                Err(e) => Observed::Absent(e.to_string()),
            };
            (name.clone(), observed)
        });
        let observed = join_all(queries).await;

        for (name, o) in &observed {
            match o {
                Observed::Count(count) => {
                    tracing::debug!("{} count: {}", name, count);
                    self.sink.line(&format!("{} count: `{}`", name, count));
                }
                Observed::Absent(reason) => {
                    tracing::warn!("{} did not answer: {}", name, reason);
                    self.sink.line(&format!("{} count: absent ({})", name, reason));
                }
            }
        }

        let verdict = Verdict::from_observations(observed);
        self.sink.line(verdict.summary());

        let halted = permit.held_for();
        permit.release().map_err(HarnessError::from)?;

        tracing::info!(
            "Consistency check: {:?} {:?}, writes halted for {:?}",
            verdict.kind,
            verdict.counts(),
            halted
        );
        Ok(verdict)
    }

    /// Requested names that are currently members, in request order
    fn targets(&self, requested: &[&str]) -> Vec<(String, NodeRef)> {
        let live = self.replicas.live_nodes();
        requested
            .iter()
            .filter_map(|name| live.iter().find(|(n, _)| n == name).cloned())
            .collect()
    }

    async fn settle(&self, targets: &[(String, NodeRef)]) {
        match &self.config.settle {
            Settle::Fixed(delay) => tokio::time::sleep(*delay).await,
            Settle::LagProbe {
                poll,
                timeout,
                fallback,
            } => {
                let deadline = Instant::now() + *timeout;
                loop {
                    let lags = join_all(targets.iter().map(|(_, n)| n.replication_lag())).await;

                    // Unreachable nodes will show up as absent; ignore them here
                    if lags.iter().any(|l| matches!(l, Ok(None))) {
                        tracing::debug!("Replication lag unavailable, sleeping {:?}", fallback);
                        tokio::time::sleep(*fallback).await;
                        return;
                    }
                    let behind: u64 = lags.iter().filter_map(|l| l.clone().ok().flatten()).sum();
                    if behind == 0 {
                        return;
                    }
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            "Replication still {} events behind after {:?}",
                            behind,
                            timeout
                        );
                        return;
                    }
                    tokio::time::sleep(*poll).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(entries: &[(&str, Option<u64>)]) -> Vec<(String, Observed)> {
        entries
            .iter()
            .map(|(name, count)| {
                let o = match count {
                    Some(c) => Observed::Count(*c),
                    None => Observed::Absent("down".into()),
                };
                (name.to_string(), o)
            })
            .collect()
    }

    #[test]
    fn test_classification() {
        let v = Verdict::from_observations(obs(&[("a", Some(42)), ("b", Some(42)), ("c", Some(42))]));
        assert_eq!(v.kind, VerdictKind::Converged);

        let v = Verdict::from_observations(obs(&[("a", Some(42)), ("b", Some(42)), ("c", Some(40))]));
        assert_eq!(v.kind, VerdictKind::Diverged);

        let v = Verdict::from_observations(obs(&[("a", Some(42)), ("b", Some(42)), ("c", None)]));
        assert_eq!(v.kind, VerdictKind::Converged);
        assert_eq!(v.absent(), vec!["c"]);
    }

    #[test]
    fn test_too_few_answers_is_inconclusive() {
        assert_eq!(Verdict::from_observations(vec![]).kind, VerdictKind::Inconclusive);
        assert_eq!(
            Verdict::from_observations(obs(&[("a", Some(1))])).kind,
            VerdictKind::Inconclusive
        );
        assert_eq!(
            Verdict::from_observations(obs(&[("a", Some(1)), ("b", None)])).kind,
            VerdictKind::Inconclusive
        );
    }

    #[test]
    fn test_counts_and_lookup() {
        let v = Verdict::from_observations(obs(&[("a", Some(3)), ("b", None)]));
        assert_eq!(v.counts(), vec![("a", 3)]);
        assert_eq!(v.count("a"), Some(3));
        assert_eq!(v.count("b"), None);
        assert_eq!(v.count("zzz"), None);
    }
}
