//! Statement log - the primary's ordered record of mutating statements

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

/// Name reported as the primary's current log file
pub const LOG_FILE: &str = "sim-bin.000001";

/// One replicated statement
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// 1-based position; a replica at position N has applied entries 1..=N
    pub position: u64,
    pub statement: String,
    pub committed_at: Instant,
}

/// Append-only statement log shared between the primary and the appliers
#[derive(Clone, Default)]
pub struct StatementLog {
    entries: Arc<RwLock<Vec<LogEntry>>>,
}

impl StatementLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a committed statement, returning its position
    pub fn append(&self, statement: &str) -> u64 {
        let mut entries = self.entries.write();
        let position = entries.len() as u64 + 1;
        entries.push(LogEntry {
            position,
            statement: statement.to_string(),
            committed_at: Instant::now(),
        });
        position
    }

    /// Position of the last entry (0 when empty)
    pub fn head(&self) -> u64 {
        self.entries.read().len() as u64
    }

    /// Entries after `position`, in order
    pub fn entries_after(&self, position: u64) -> Vec<LogEntry> {
        let entries = self.entries.read();
        let start = (position as usize).min(entries.len());
        entries[start..].to_vec()
    }
}
