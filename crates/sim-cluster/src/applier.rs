//! Replication applier - replays the primary's statement log on one replica

use crate::node::NodeState;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Applier timing for one replica
#[derive(Debug, Clone, Copy)]
pub struct ApplierConfig {
    /// Minimum age of a log entry before it is applied
    pub lag: Duration,
    /// Base polling period
    pub poll: Duration,
    /// Random extra delay added to each poll
    pub jitter: Duration,
}

/// Apply every log entry that is due. Returns how many were applied.
///
/// Does nothing while the node is down or replication is stopped. A failing
/// entry stops replication and is recorded as the last error; the position
/// stays on the entry before it.
pub(crate) fn apply_ready(state: &NodeState, lag: Duration) -> usize {
    let Some(replication) = state.replication() else {
        return 0;
    };
    if !state.is_up() {
        return 0;
    }

    let mut replication = replication.lock();
    if !replication.running {
        return 0;
    }

    let mut applied = 0;
    for entry in state.log.entries_after(replication.position) {
        if entry.committed_at.elapsed() < lag {
            break;
        }
        match state.apply(&entry.statement) {
            Ok(()) => {
                replication.position = entry.position;
                applied += 1;
            }
            Err(e) => {
                let message = format!(
                    "Error executing statement at position {}: {}",
                    entry.position, e
                );
                tracing::warn!("{}: replication stopped: {}", state.name, message);
                replication.running = false;
                replication.last_error = Some(message);
                break;
            }
        }
    }
    applied
}

/// Spawn the applier loop for a replica
pub(crate) fn spawn(
    state: Arc<NodeState>,
    config: ApplierConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!("Applier for '{}' started ({:?} lag)", state.name, config.lag);
        loop {
            let jitter_ms = config.jitter.as_millis() as u64;
            let extra = if jitter_ms > 0 {
                Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
            } else {
                Duration::ZERO
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(config.poll + extra) => {}
            }

            let applied = apply_ready(&state, config.lag);
            if applied > 0 {
                tracing::trace!("{}: applied {} statements", state.name, applied);
            }
        }
        tracing::debug!("Applier for '{}' stopped", state.name);
    })
}
