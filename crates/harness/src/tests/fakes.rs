//! Instrumented in-memory nodes and lifecycle for scenario tests

use crate::error::{ExecutionError, TopologyError};
use crate::lifecycle::NodeLifecycle;
use crate::node::{DataNode, Row, Value};
use crate::replica_set::NodeRef;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

/// What a scripted node answers to a count query
#[derive(Debug, Clone)]
pub enum Script {
    Count(u64),
    Text(String),
    Fail,
    Panic,
}

/// Replica whose answers are set by the test
pub struct ScriptedNode {
    name: String,
    script: Mutex<Script>,
    /// Lag reported on successive probes; last value repeats
    lag: Mutex<Vec<Option<u64>>>,
    pub queries: AtomicU64,
}

impl ScriptedNode {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script: Mutex::new(script),
            lag: Mutex::new(vec![None]),
            queries: AtomicU64::new(0),
        })
    }

    pub fn count(name: &str, count: u64) -> Arc<Self> {
        Self::new(name, Script::Count(count))
    }

    pub fn set(&self, script: Script) {
        *self.script.lock() = script;
    }

    pub fn with_lag(self: Arc<Self>, lag: Vec<Option<u64>>) -> Arc<Self> {
        *self.lag.lock() = lag;
        self
    }
}

#[async_trait]
impl DataNode for ScriptedNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _sql: &str) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Row>, ExecutionError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().clone();
        match script {
            Script::Count(n) => Ok(vec![Row::new().with("COUNT(*)", n as i64)]),
            Script::Text(s) => Ok(vec![Row::new().with("COUNT(*)", Value::Text(s))]),
            Script::Fail => Err(ExecutionError::node_down(&self.name, sql)),
            Script::Panic => panic!("scripted node '{}' blew up", self.name),
        }
    }

    async fn replication_lag(&self) -> Result<Option<u64>, ExecutionError> {
        let mut lag = self.lag.lock();
        if lag.len() > 1 {
            Ok(lag.remove(0))
        } else {
            Ok(lag.first().copied().flatten())
        }
    }
}

/// Primary that counts inserts and flags any that land inside a check window
///
/// The window opens on the first lag probe, or through `open_window`, and
/// closes when the count query finishes. Both openers run only while the
/// checker holds the gate.
pub struct RecordingNode {
    name: String,
    pub inserts: AtomicU64,
    pub violations: AtomicU64,
    window: AtomicBool,
    query_delay: Duration,
}

impl RecordingNode {
    pub fn new(name: &str, query_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            inserts: AtomicU64::new(0),
            violations: AtomicU64::new(0),
            window: AtomicBool::new(false),
            query_delay,
        })
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Open the window without a lag probe
    pub fn open_window(&self) {
        self.window.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataNode for RecordingNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _sql: &str) -> Result<(), ExecutionError> {
        if self.window.load(Ordering::SeqCst) {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_rows(&self, _sql: &str) -> Result<Vec<Row>, ExecutionError> {
        let before = self.inserts();
        tokio::time::sleep(self.query_delay).await;
        let after = self.inserts();
        self.window.store(false, Ordering::SeqCst);
        if before != after {
            self.violations.fetch_add(after - before, Ordering::SeqCst);
        }
        Ok(vec![Row::new().with("COUNT(*)", after as i64)])
    }

    async fn replication_lag(&self) -> Result<Option<u64>, ExecutionError> {
        self.window.store(true, Ordering::SeqCst);
        Ok(Some(0))
    }
}

/// Lifecycle collaborator backed by a name → node map
#[derive(Default)]
pub struct FakeLifecycle {
    nodes: Mutex<HashMap<String, NodeRef>>,
    down: Mutex<HashSet<String>>,
    pub fail_stop: AtomicBool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeLifecycle {
    pub fn with_node(self, name: &str, node: NodeRef) -> Self {
        self.nodes.lock().insert(name.to_string(), node);
        self
    }

    pub fn is_down(&self, name: &str) -> bool {
        self.down.lock().contains(name)
    }

    fn known(&self, name: &str) -> Result<(), TopologyError> {
        if self.nodes.lock().contains_key(name) {
            Ok(())
        } else {
            Err(TopologyError::UnknownNode(name.to_string()))
        }
    }
}

#[async_trait]
impl NodeLifecycle for FakeLifecycle {
    async fn wait_until_ready(&self, name: &str) -> Result<(), TopologyError> {
        self.calls.lock().push(format!("wait {}", name));
        self.known(name)?;
        if self.is_down(name) {
            return Err(TopologyError::Lifecycle {
                node: name.to_string(),
                message: "not running".into(),
            });
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), TopologyError> {
        self.calls.lock().push(format!("stop {}", name));
        self.known(name)?;
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(TopologyError::Lifecycle {
                node: name.to_string(),
                message: "stop refused".into(),
            });
        }
        self.down.lock().insert(name.to_string());
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), TopologyError> {
        self.calls.lock().push(format!("start {}", name));
        self.known(name)?;
        self.down.lock().remove(name);
        Ok(())
    }

    async fn connect(&self, name: &str) -> Result<NodeRef, TopologyError> {
        self.nodes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| TopologyError::UnknownNode(name.to_string()))
    }
}
