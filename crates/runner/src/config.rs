//! Runner Configuration

use replica_harness::HarnessConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Scenario configuration, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Generator and checker settings
    pub harness: HarnessConfig,
    /// Markdown report destination
    pub report_path: PathBuf,
    /// Number of replicas; the first is writable, the rest read-only
    pub replicas: usize,
    /// Time the generator runs before the first check
    pub warmup_ms: u64,
    /// Pause after each topology change before checking
    pub pause_ms: u64,
    /// Replication delay on every simulated replica
    pub replica_lag_ms: u64,
    /// Random extra applier delay per poll
    pub replica_jitter_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            harness: HarnessConfig::default(),
            report_path: PathBuf::from("REPORT.md"),
            replicas: 2,
            warmup_ms: 3000,
            pause_ms: 3000,
            replica_lag_ms: 50,
            replica_jitter_ms: 20,
        }
    }
}

impl RunnerConfig {
    /// Read a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        std::fs::write(
            &path,
            r#"{"pause_ms": 10, "harness": {"write_interval_ms": 5}}"#,
        )
        .unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.pause_ms, 10);
        assert_eq!(config.warmup_ms, 3000);
        assert_eq!(config.replicas, 2);
        assert_eq!(config.harness.write_interval_ms, 5);
        assert_eq!(config.harness.settle_ms, replica_harness::SETTLE_MS);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(RunnerConfig::load(Path::new("/nonexistent/runner.json")).is_err());
    }
}
