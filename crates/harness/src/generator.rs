//! Write generator - perpetual background inserts into the primary
//!
//! One insert per tick, each wrapped in a non-blocking gate attempt. A tick
//! that finds the gate taken is skipped rather than queued, so while a check
//! holds the gate no backlog of pending writes builds up behind it.

use crate::gate::ExclusionGate;
use crate::replica_set::NodeRef;
use crate::{DEFAULT_INSERT_SQL, WRITE_INTERVAL_MS};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Placeholder substituted with a fresh unique token in the insert template
pub const VALUE_PLACEHOLDER: &str = "{value}";

/// Shortest tick period; tokio intervals cannot be zero
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Write generator configuration
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Time between insert attempts
    pub interval: Duration,
    /// Insert template; `{value}` is replaced per row
    pub insert_sql: String,
}

impl GeneratorConfig {
    /// Set the tick period, raised to [`MIN_INTERVAL`] if shorter
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_insert_sql(mut self, sql: impl Into<String>) -> Self {
        self.insert_sql = sql.into();
        self
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(WRITE_INTERVAL_MS),
            insert_sql: DEFAULT_INSERT_SQL.to_string(),
        }
    }
}

/// Counters describing generator activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct GeneratorStats {
    /// Inserts dispatched to the primary
    pub attempted: u64,
    /// Inserts the primary accepted
    pub inserted: u64,
    /// Ticks skipped because the gate was held
    pub skipped: u64,
    /// Inserts the primary rejected
    pub failed: u64,
    pub last_error: Option<String>,
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Inserted,
    Failed,
    Skipped,
}

struct Shared {
    stats: RwLock<GeneratorStats>,
    /// Write counter used to label rows
    sequence: AtomicU64,
    running: AtomicBool,
}

/// Clears the running flag however the loop exits, panics included
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::SeqCst);
    }
}

/// Background inserter gated by an [`ExclusionGate`]
pub struct WriteGenerator {
    primary: NodeRef,
    gate: ExclusionGate,
    config: GeneratorConfig,
    shared: Arc<Shared>,
}

impl WriteGenerator {
    pub fn new(primary: NodeRef, gate: ExclusionGate, config: GeneratorConfig) -> Self {
        Self {
            primary,
            gate,
            config,
            shared: Arc::new(Shared {
                stats: RwLock::new(GeneratorStats::default()),
                sequence: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Run on the tokio runtime until the returned handle stops or is dropped
    pub fn spawn(self) -> GeneratorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = self.shared.clone();
        shared.running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(self.run(shutdown_rx));
        GeneratorHandle {
            shutdown: shutdown_tx,
            task: Some(task),
            shared,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let _running = RunningGuard(self.shared.clone());
        let period = self.config.interval.max(MIN_INTERVAL);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            "Write generator started on '{}' ({}ms interval)",
            self.primary.name(),
            period.as_millis()
        );

        loop {
            // Cancellation is only observed between ticks; an insert in
            // flight always completes.
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = interval.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick().await;
        }

        let stats = self.shared.stats.read().clone();
        tracing::info!(
            "Write generator stopped: {} inserted, {} failed, {} skipped",
            stats.inserted,
            stats.failed,
            stats.skipped
        );
    }

    /// Perform one gated insert attempt
    pub async fn tick(&self) -> TickOutcome {
        let Some(permit) = self.gate.try_acquire() else {
            self.shared.stats.write().skipped += 1;
            tracing::trace!("Gate held, skipping write tick");
            return TickOutcome::Skipped;
        };

        let seq = self.shared.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let value = format!("w{}-{}", seq, Uuid::new_v4());
        let sql = self.config.insert_sql.replace(VALUE_PLACEHOLDER, &value);
        self.shared.stats.write().attempted += 1;

        let outcome = match self.primary.execute(&sql).await {
            Ok(()) => {
                self.shared.stats.write().inserted += 1;
                TickOutcome::Inserted
            }
            Err(e) => {
                tracing::warn!("Insert into '{}' failed: {}", self.primary.name(), e);
                let mut stats = self.shared.stats.write();
                stats.failed += 1;
                stats.last_error = Some(e.to_string());
                TickOutcome::Failed
            }
        };

        drop(permit);
        outcome
    }

    pub fn stats(&self) -> GeneratorStats {
        self.shared.stats.read().clone()
    }
}

/// Control handle for a spawned generator
pub struct GeneratorHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl GeneratorHandle {
    pub fn stats(&self) -> GeneratorStats {
        self.shared.stats.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Signal cancellation and wait for the loop to exit
    pub async fn stop(mut self) -> GeneratorStats {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Write generator task failed: {}", e);
            }
        }
        self.stats()
    }
}

impl Drop for GeneratorHandle {
    fn drop(&mut self) {
        // Detached: the loop exits at its next tick boundary
        let _ = self.shutdown.send(true);
    }
}
