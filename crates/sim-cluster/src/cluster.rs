//! Simulated cluster - a primary, its replicas and their lifecycle

use crate::applier::{self, ApplierConfig};
use crate::binlog::StatementLog;
use crate::error::SimError;
use crate::node::{NodeState, ReplicationState, Role, SimNode};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use replica_harness::{NodeLifecycle, NodeRef, TopologyError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default applier polling period
pub const APPLIER_POLL_MS: u64 = 10;

/// How long `wait_until_ready` waits for a node to come up
pub const READY_TIMEOUT_MS: u64 = 5_000;

/// Per-replica settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicaOptions {
    /// Minimum delay before a primary statement is applied here
    pub lag: Duration,
    /// Random extra delay per applier poll
    pub jitter: Duration,
    /// Reject writes from unprivileged clients
    pub read_only: bool,
}

impl ReplicaOptions {
    pub fn with_lag(mut self, lag: Duration) -> Self {
        self.lag = lag;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// In-process replicated store
pub struct SimCluster {
    primary: String,
    nodes: DashMap<String, Arc<NodeState>>,
    log: StatementLog,
    shutdown: watch::Sender<bool>,
    appliers: Mutex<Vec<JoinHandle<()>>>,
}

impl SimCluster {
    pub fn builder() -> SimClusterBuilder {
        SimClusterBuilder::new()
    }

    pub fn primary_name(&self) -> &str {
        &self.primary
    }

    /// Node names, primary first
    pub fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .nodes
            .iter()
            .map(|r| r.key().clone())
            .filter(|n| *n != self.primary)
            .collect();
        names.sort();
        names.insert(0, self.primary.clone());
        names
    }

    /// Privileged client handle, regardless of node state
    pub fn node(&self, name: &str) -> Result<SimNode, SimError> {
        Ok(SimNode::new(self.state(name)?, true))
    }

    /// Client handle subject to the node's read-only setting
    pub fn unprivileged(&self, name: &str) -> Result<SimNode, SimError> {
        Ok(SimNode::new(self.state(name)?, false))
    }

    pub fn is_up(&self, name: &str) -> bool {
        self.nodes.get(name).map(|s| s.is_up()).unwrap_or(false)
    }

    /// Current replication progress of a replica
    pub fn replication_state(&self, name: &str) -> Option<ReplicationState> {
        let state = self.nodes.get(name)?;
        state.replication().map(|r| r.lock().clone())
    }

    /// Statements recorded on the primary
    pub fn log_head(&self) -> u64 {
        self.log.head()
    }

    /// Stop every applier and wait for them
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<_> = self.appliers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::debug!("Simulated cluster shut down");
    }

    fn state(&self, name: &str) -> Result<Arc<NodeState>, SimError> {
        self.nodes
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    fn lifecycle_state(&self, name: &str) -> Result<Arc<NodeState>, TopologyError> {
        self.state(name)
            .map_err(|_| TopologyError::UnknownNode(name.to_string()))
    }
}

impl Drop for SimCluster {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[async_trait]
impl NodeLifecycle for SimCluster {
    async fn wait_until_ready(&self, name: &str) -> Result<(), TopologyError> {
        let state = self.lifecycle_state(name)?;
        let deadline = Instant::now() + Duration::from_millis(READY_TIMEOUT_MS);
        while !state.is_up() {
            if Instant::now() >= deadline {
                return Err(TopologyError::Lifecycle {
                    node: name.to_string(),
                    message: format!("not ready after {}ms", READY_TIMEOUT_MS),
                });
            }
            tokio::time::sleep(Duration::from_millis(APPLIER_POLL_MS)).await;
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), TopologyError> {
        let state = self.lifecycle_state(name)?;
        state.up.store(false, Ordering::SeqCst);
        tracing::info!("Simulated node '{}' stopped", name);
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), TopologyError> {
        let state = self.lifecycle_state(name)?;
        state.up.store(true, Ordering::SeqCst);
        tracing::info!("Simulated node '{}' started", name);
        Ok(())
    }

    async fn connect(&self, name: &str) -> Result<NodeRef, TopologyError> {
        let state = self.lifecycle_state(name)?;
        if !state.is_up() {
            return Err(TopologyError::Lifecycle {
                node: name.to_string(),
                message: "connection refused".into(),
            });
        }
        Ok(Arc::new(SimNode::new(state, true)))
    }
}

/// Builder for SimCluster
pub struct SimClusterBuilder {
    primary: String,
    replicas: Vec<(String, ReplicaOptions)>,
    poll: Duration,
}

impl SimClusterBuilder {
    pub fn new() -> Self {
        Self {
            primary: "primary".to_string(),
            replicas: Vec::new(),
            poll: Duration::from_millis(APPLIER_POLL_MS),
        }
    }

    pub fn primary(mut self, name: &str) -> Self {
        self.primary = name.to_string();
        self
    }

    pub fn replica(mut self, name: &str, options: ReplicaOptions) -> Self {
        self.replicas.push((name.to_string(), options));
        self
    }

    pub fn poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Open every node and spawn the appliers; requires a tokio runtime
    pub fn build(self) -> Result<SimCluster, SimError> {
        let log = StatementLog::new();
        let nodes = DashMap::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut appliers = Vec::new();

        let primary = NodeState::open(&self.primary, Role::Primary, log.clone())?;
        nodes.insert(self.primary.clone(), Arc::new(primary));

        for (name, options) in self.replicas {
            if nodes.contains_key(&name) {
                return Err(SimError::Layout(format!("duplicate node name '{}'", name)));
            }
            let role = Role::Replica {
                source: self.primary.clone(),
                read_only: options.read_only,
                replication: Mutex::new(ReplicationState::default()),
            };
            let state = Arc::new(NodeState::open(&name, role, log.clone())?);
            appliers.push(applier::spawn(
                state.clone(),
                ApplierConfig {
                    lag: options.lag,
                    poll: self.poll,
                    jitter: options.jitter,
                },
                shutdown_rx.clone(),
            ));
            nodes.insert(name, state);
        }

        tracing::info!(
            "Simulated cluster ready: primary '{}', {} replicas",
            self.primary,
            appliers.len()
        );

        Ok(SimCluster {
            primary: self.primary,
            nodes,
            log,
            shutdown,
            appliers: Mutex::new(appliers),
        })
    }
}

impl Default for SimClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
