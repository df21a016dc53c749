//! Replication scenario
//!
//! Provisions a simulated primary with a set of replicas, keeps the primary busy
//! with background inserts, and narrates a series of consistency checks
//! around a replica outage and schema changes made directly on replicas.

use crate::config::RunnerConfig;
use anyhow::{bail, Context, Result};
use replica_harness::{
    ConsistencyChecker, DataNode, EventSink, ExclusionGate, GeneratorStats, NodeLifecycle,
    ReplicaSet, Topology, Verdict, WriteGenerator,
};
use sim_cluster::{ReplicaOptions, SimCluster, LOG_FILE};
use std::sync::Arc;
use std::time::Duration;

pub const PRIMARY: &str = "primary";

/// The scenario needs one writable and at least one read-only replica
pub const MIN_REPLICAS: usize = 2;

const ORDINALS: [&str; 9] = [
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine",
];

const CREATE_USERS: &str = "CREATE TABLE IF NOT EXISTS test.users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name VARCHAR(45) NOT NULL)";
const DROP_NAME_COLUMN: &str = "ALTER TABLE test.users DROP COLUMN name";

/// Logical name of the `index`th replica, counting from 1
pub fn replica_name(index: usize) -> String {
    match ORDINALS.get(index.wrapping_sub(1)) {
        Some(word) => format!("replica-{}", word),
        None => format!("replica-{}", index),
    }
}

/// Everything the scenario observed
#[derive(Debug)]
pub struct ScenarioOutcome {
    /// Each check, labelled by the step that ran it
    pub checks: Vec<(String, Verdict)>,
    pub generator: GeneratorStats,
}

impl ScenarioOutcome {
    pub fn final_verdict(&self) -> Option<&Verdict> {
        self.checks.last().map(|(_, v)| v)
    }
}

/// Run the full scenario, narrating into `sink`
///
/// The first replica is writable, the others are read-only. The last replica
/// is the one taken down and brought back.
pub async fn run(config: &RunnerConfig, sink: Arc<dyn EventSink>) -> Result<ScenarioOutcome> {
    if config.replicas < MIN_REPLICAS {
        bail!(
            "the scenario needs at least {} replicas, got {}",
            MIN_REPLICAS,
            config.replicas
        );
    }

    let pause = Duration::from_millis(config.pause_ms);
    let options = ReplicaOptions::default()
        .with_lag(Duration::from_millis(config.replica_lag_ms))
        .with_jitter(Duration::from_millis(config.replica_jitter_ms));

    let replica_names: Vec<String> = (1..=config.replicas).map(replica_name).collect();
    let writable_name = replica_names[0].clone();
    let outage_name = replica_names[replica_names.len() - 1].clone();

    let mut builder = SimCluster::builder().primary(PRIMARY);
    for (i, name) in replica_names.iter().enumerate() {
        let opts = if i == 0 { options } else { options.read_only() };
        builder = builder.replica(name, opts);
    }
    let cluster = Arc::new(
        builder
            .build()
            .context("failed to provision simulated cluster")?,
    );

    let mut all_names = vec![PRIMARY.to_string()];
    all_names.extend(replica_names.iter().cloned());
    let without_outage: Vec<String> = all_names
        .iter()
        .filter(|n| **n != outage_name)
        .cloned()
        .collect();

    sink.title("Database: Replication report");
    sink.line(&format!(
        "Testing the behavior of a database with replication. Generated {}.",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    ));

    sink.section("Setting up databases and replication");
    sink.line(&format!(
        "Starting the primary and {} replicas.",
        replica_names.len()
    ));

    sink.line("Preparing the primary database:");
    cluster.wait_until_ready(PRIMARY).await?;
    let primary = cluster.connect(PRIMARY).await?;
    let replicas = ReplicaSet::new(PRIMARY, primary.clone());
    let topology = Topology::new(cluster.clone(), replicas.clone(), sink.clone());

    topology
        .administer(PRIMARY, &["DROP TABLE IF EXISTS test.users"])
        .await?;
    let status = primary.query_row("SHOW PRIMARY STATUS").await?;
    sink.line("Primary status:");
    sink.block(&status.prettify());
    let position = status
        .get("Position")
        .context("primary status has no Position")?
        .to_string();

    let change_source = format!(
        "CHANGE REPLICATION SOURCE TO SOURCE_HOST='{}',\n  SOURCE_LOG_FILE='{}',\n  SOURCE_LOG_POS={}",
        PRIMARY, LOG_FILE, position
    );
    for name in &replica_names {
        sink.line(&format!("Preparing {}:", name));
        topology.join(name).await?;
        topology
            .administer(
                name,
                &[
                    "STOP REPLICA",
                    "DROP TABLE IF EXISTS test.users",
                    change_source.as_str(),
                    "START REPLICA",
                ],
            )
            .await?;
    }

    sink.line("Inserting data into the primary:");
    topology
        .administer(PRIMARY, &[CREATE_USERS, "TRUNCATE TABLE test.users"])
        .await?;

    sink.line("Starting daemon to constantly populate the primary:");
    let gate = ExclusionGate::new();
    let generator =
        WriteGenerator::new(primary.clone(), gate.clone(), config.harness.generator()).spawn();
    let checker = ConsistencyChecker::new(
        replicas.clone(),
        gate.clone(),
        config.harness.checker(),
        sink.clone(),
    );
    tokio::time::sleep(Duration::from_millis(config.warmup_ms)).await;

    let mut checks = Vec::new();

    sink.section("Checking replication");
    sink.line("Checking replica statuses:");
    for name in &replica_names {
        sink.line(&format!("{}:", name));
        topology.describe(name, "SHOW REPLICA STATUS").await?;
    }
    checks.push((
        "initial".to_string(),
        checker.check_consistency(&all_names).await?,
    ));

    sink.section("Turning off one of the replicas");
    topology.stop_node(&outage_name).await?;
    tokio::time::sleep(pause).await;
    checks.push((
        "replica stopped".to_string(),
        checker.check_consistency(&without_outage).await?,
    ));

    topology.start_node(&outage_name).await?;
    tokio::time::sleep(pause).await;
    checks.push((
        "replica restarted".to_string(),
        checker.check_consistency(&all_names).await?,
    ));

    sink.section("Trying to remove a column on the replicas");

    sink.subsection("On the writable replica");
    let writable = replicas
        .get(&writable_name)
        .context("writable replica left the replica set")?;
    remove_column(writable.as_ref(), sink.as_ref()).await;

    sink.subsection("On the read-only replica");
    let unprivileged = cluster.unprivileged(&outage_name)?;
    remove_column(&unprivileged, sink.as_ref()).await;

    sink.subsection("Final replication status");
    tokio::time::sleep(pause).await;
    for name in &replica_names {
        sink.line(&format!("{}:", name));
        topology.describe(name, "SHOW REPLICA STATUS").await?;
    }
    checks.push((
        "final".to_string(),
        checker.check_consistency(&all_names).await?,
    ));

    let stats = generator.stop().await;
    sink.line(&format!(
        "Generator: {} inserted, {} failed, {} ticks skipped while checks held the gate.",
        stats.inserted, stats.failed, stats.skipped
    ));
    cluster.shutdown().await;

    Ok(ScenarioOutcome {
        checks,
        generator: stats,
    })
}

/// Try dropping a column directly on a replica and narrate what happened
async fn remove_column(node: &dyn DataNode, sink: &dyn EventSink) {
    sink.line("Removing column on replica:");
    sink.block(DROP_NAME_COLUMN);

    match node.try_execute(DROP_NAME_COLUMN).await {
        Some(e) => sink.line(&format!("Exception: `{}`", e)),
        None => {
            sink.line("No exception");
            sink.line("Table description:");
            match node.query_row("DESCRIBE test.users").await {
                Ok(row) => sink.block(&row.prettify()),
                Err(e) => sink.line(&format!("Could not describe table: `{}`", e)),
            }
        }
    }
}
