//! Node lifecycle - external start/stop control and the topology it drives

use crate::error::{HarnessError, Result, TopologyError};
use crate::replica_set::{NodeRef, ReplicaSet};
use crate::sink::EventSink;
use async_trait::async_trait;
use std::sync::Arc;

/// Provisioning collaborator, keyed by logical node name
#[async_trait]
pub trait NodeLifecycle: Send + Sync {
    /// Block until the node accepts connections
    async fn wait_until_ready(&self, name: &str) -> Result<(), TopologyError>;

    async fn stop(&self, name: &str) -> Result<(), TopologyError>;

    async fn start(&self, name: &str) -> Result<(), TopologyError>;

    /// Open a data-access handle to a ready node
    async fn connect(&self, name: &str) -> Result<NodeRef, TopologyError>;
}

/// Keeps the replica set in step with node starts and stops
pub struct Topology {
    lifecycle: Arc<dyn NodeLifecycle>,
    replicas: ReplicaSet,
    sink: Arc<dyn EventSink>,
}

impl Topology {
    pub fn new(
        lifecycle: Arc<dyn NodeLifecycle>,
        replicas: ReplicaSet,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            lifecycle,
            replicas,
            sink,
        }
    }

    /// Wait for a node, connect to it and register it
    pub async fn join(&self, name: &str) -> Result<NodeRef> {
        self.lifecycle.wait_until_ready(name).await?;
        let node = self.lifecycle.connect(name).await?;
        self.replicas.add_node(name, node.clone())?;
        Ok(node)
    }

    /// Stop a replica and drop it from the set
    pub async fn stop_node(&self, name: &str) -> Result<()> {
        if self.replicas.primary_name() == name {
            return Err(TopologyError::PrimaryRemoval(name.to_string()).into());
        }
        if !self.replicas.contains(name) {
            return Err(TopologyError::UnknownNode(name.to_string()).into());
        }

        self.sink.line(&format!("Stopping {}:", name));
        self.lifecycle.stop(name).await?;
        self.replicas.remove_node(name)?;
        tracing::info!("Node '{}' stopped and removed from the replica set", name);
        Ok(())
    }

    /// Start a node, wait for it and add it back to the set
    pub async fn start_node(&self, name: &str) -> Result<NodeRef> {
        if self.replicas.contains(name) {
            return Err(TopologyError::DuplicateNode(name.to_string()).into());
        }

        self.sink.line(&format!("Starting {} again:", name));
        self.lifecycle.start(name).await?;
        let node = self.join(name).await?;
        tracing::info!("Node '{}' restarted and rejoined the replica set", name);
        Ok(node)
    }

    /// Run an administrative batch against a member, narrating it first
    pub async fn administer(&self, name: &str, statements: &[&str]) -> Result<()> {
        let node = self.member(name)?;
        self.sink.block(&statements.join("\n"));
        node.execute_batch(statements).await?;
        Ok(())
    }

    /// Query a single row from a member and narrate it
    pub async fn describe(&self, name: &str, sql: &str) -> Result<()> {
        let node = self.member(name)?;
        let row = node.query_row(sql).await?;
        self.sink.block(&row.prettify());
        Ok(())
    }

    pub fn replicas(&self) -> &ReplicaSet {
        &self.replicas
    }

    fn member(&self, name: &str) -> Result<NodeRef> {
        self.replicas
            .get(name)
            .ok_or_else(|| HarnessError::from(TopologyError::UnknownNode(name.to_string())))
    }
}
