//! Replica set - named registry of the primary and its live replicas

use crate::error::TopologyError;
use crate::node::DataNode;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared node handle
pub type NodeRef = Arc<dyn DataNode>;

struct Members {
    primary: String,
    /// Insertion-ordered; primary is always the first entry
    nodes: Vec<(String, NodeRef)>,
}

/// Thread-safe, insertion-ordered node registry
///
/// Readers get a copied snapshot, so a topology change racing a consistency
/// check never shows up half-applied.
#[derive(Clone)]
pub struct ReplicaSet {
    members: Arc<RwLock<Members>>,
}

impl ReplicaSet {
    /// Create a set containing only the primary
    pub fn new(primary_name: impl Into<String>, primary: NodeRef) -> Self {
        let primary_name = primary_name.into();
        Self {
            members: Arc::new(RwLock::new(Members {
                primary: primary_name.clone(),
                nodes: vec![(primary_name, primary)],
            })),
        }
    }

    /// Add a node under a name not already in use
    pub fn add_node(&self, name: impl Into<String>, node: NodeRef) -> Result<(), TopologyError> {
        let name = name.into();
        let mut members = self.members.write();
        if members.nodes.iter().any(|(n, _)| *n == name) {
            return Err(TopologyError::DuplicateNode(name));
        }
        tracing::debug!("Replica set: added '{}'", name);
        members.nodes.push((name, node));
        Ok(())
    }

    /// Remove a replica, returning its handle. The primary cannot be removed.
    pub fn remove_node(&self, name: &str) -> Result<NodeRef, TopologyError> {
        let mut members = self.members.write();
        if members.primary == name {
            return Err(TopologyError::PrimaryRemoval(name.to_string()));
        }
        let index = members
            .nodes
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| TopologyError::UnknownNode(name.to_string()))?;
        let (_, node) = members.nodes.remove(index);
        tracing::debug!("Replica set: removed '{}'", name);
        Ok(node)
    }

    /// The writable node
    pub fn primary(&self) -> NodeRef {
        let members = self.members.read();
        // The primary is inserted at construction and can never be removed
        members.nodes[0].1.clone()
    }

    pub fn primary_name(&self) -> String {
        self.members.read().primary.clone()
    }

    /// Snapshot of current membership, in insertion order
    pub fn live_nodes(&self) -> Vec<(String, NodeRef)> {
        self.members.read().nodes.clone()
    }

    /// Look up a member by name
    pub fn get(&self, name: &str) -> Option<NodeRef> {
        self.members
            .read()
            .nodes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, node)| node.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.read().nodes.iter().any(|(n, _)| n == name)
    }

    /// Member names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.members
            .read()
            .nodes
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.read().nodes.len()
    }

    /// Never true: the primary is always present
    pub fn is_empty(&self) -> bool {
        false
    }
}
