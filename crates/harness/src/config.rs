//! Harness configuration

use crate::checker::{CheckerConfig, Settle};
use crate::generator::GeneratorConfig;
use crate::{DEFAULT_COUNT_SQL, DEFAULT_INSERT_SQL, SETTLE_MS, WRITE_INTERVAL_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the checker decides replication has settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettleStrategy {
    Fixed,
    LagProbe,
}

/// Serializable timing and statement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Milliseconds between generator ticks
    pub write_interval_ms: u64,
    /// Quiescence window in milliseconds (also the lag-probe fallback)
    pub settle_ms: u64,
    pub settle: SettleStrategy,
    /// Lag-probe polling period in milliseconds
    pub lag_probe_interval_ms: u64,
    /// Lag-probe give-up time in milliseconds
    pub lag_probe_timeout_ms: u64,
    pub count_sql: String,
    pub insert_sql: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            write_interval_ms: WRITE_INTERVAL_MS,
            settle_ms: SETTLE_MS,
            settle: SettleStrategy::Fixed,
            lag_probe_interval_ms: 50,
            lag_probe_timeout_ms: 10_000,
            count_sql: DEFAULT_COUNT_SQL.to_string(),
            insert_sql: DEFAULT_INSERT_SQL.to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig::default()
            .with_interval(Duration::from_millis(self.write_interval_ms))
            .with_insert_sql(self.insert_sql.clone())
    }

    pub fn checker(&self) -> CheckerConfig {
        let settle_for = Duration::from_millis(self.settle_ms);
        let settle = match self.settle {
            SettleStrategy::Fixed => Settle::Fixed(settle_for),
            SettleStrategy::LagProbe => Settle::LagProbe {
                poll: Duration::from_millis(self.lag_probe_interval_ms),
                timeout: Duration::from_millis(self.lag_probe_timeout_ms),
                fallback: settle_for,
            },
        };
        CheckerConfig::default()
            .with_settle(settle)
            .with_count_sql(self.count_sql.clone())
    }
}
