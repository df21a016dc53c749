//! Replication consistency check
//!
//! Runs the replication scenario against an in-process simulated cluster:
//! a primary under constant insert load, one writable replica and one or
//! more read-only replicas. Writes a Markdown report of every check and topology change.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use replica_harness::{MarkdownReport, SettleStrategy, Tee, TracingSink, Verdict, VerdictKind};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod scenario;

use config::RunnerConfig;

/// How the checker waits before reading counts
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Settle {
    /// Sleep the settle window
    Fixed,
    /// Poll replica lag until caught up
    LagProbe,
}

impl From<Settle> for SettleStrategy {
    fn from(settle: Settle) -> Self {
        match settle {
            Settle::Fixed => SettleStrategy::Fixed,
            Settle::LagProbe => SettleStrategy::LagProbe,
        }
    }
}

/// Replication consistency verification harness
#[derive(Parser, Debug)]
#[command(name = "replica-check")]
#[command(about = "Check that replicas converge while the primary is under write load", long_about = None)]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Markdown report path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Time between generator inserts in milliseconds
    #[arg(long)]
    write_interval_ms: Option<u64>,

    /// Settle window in milliseconds
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Settle strategy
    #[arg(long, value_enum)]
    settle: Option<Settle>,

    /// Number of simulated replicas (at least 2)
    #[arg(long)]
    replicas: Option<usize>,

    /// Generator warmup before the first check in milliseconds
    #[arg(long)]
    warmup_ms: Option<u64>,

    /// Pause after each topology change in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Replication delay on the simulated replicas in milliseconds
    #[arg(long)]
    replica_lag_ms: Option<u64>,

    /// Exit with status 2 when the final check diverged
    #[arg(long)]
    fail_on_divergence: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn runner_config(&self) -> Result<RunnerConfig> {
        let mut config = match &self.config {
            Some(path) => RunnerConfig::load(path)
                .with_context(|| format!("failed to load config {:?}", path))?,
            None => RunnerConfig::default(),
        };

        if let Some(report) = &self.report {
            config.report_path = report.clone();
        }
        if let Some(ms) = self.write_interval_ms {
            config.harness.write_interval_ms = ms;
        }
        if let Some(ms) = self.settle_ms {
            config.harness.settle_ms = ms;
        }
        if let Some(settle) = self.settle {
            config.harness.settle = settle.into();
        }
        if let Some(n) = self.replicas {
            config.replicas = n;
        }
        if let Some(ms) = self.warmup_ms {
            config.warmup_ms = ms;
        }
        if let Some(ms) = self.pause_ms {
            config.pause_ms = ms;
        }
        if let Some(ms) = self.replica_lag_ms {
            config.replica_lag_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { "debug" } else { args.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.runner_config()?;
    tracing::info!("Starting replication consistency check");
    tracing::info!("  Write interval: {}ms", config.harness.write_interval_ms);
    tracing::info!(
        "  Settle: {:?} ({}ms)",
        config.harness.settle,
        config.harness.settle_ms
    );
    tracing::info!("  Replicas: {}", config.replicas);
    tracing::info!("  Replica lag: {}ms", config.replica_lag_ms);
    tracing::info!("  Report: {:?}", config.report_path);

    let report = Arc::new(MarkdownReport::new());
    let sink = Arc::new(Tee::new().with(report.clone()).with(Arc::new(TracingSink)));

    let outcome = scenario::run(&config, sink).await?;
    report
        .write_to_file(&config.report_path)
        .with_context(|| format!("failed to write report {:?}", config.report_path))?;

    for (label, verdict) in &outcome.checks {
        tracing::info!("Check '{}': {:?}", label, verdict.kind);
    }
    tracing::info!(
        "Generator inserted {} rows ({} failed, {} skipped)",
        outcome.generator.inserted,
        outcome.generator.failed,
        outcome.generator.skipped
    );

    if fails_run(outcome.final_verdict(), args.fail_on_divergence) {
        tracing::warn!("Final check diverged");
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

/// Only a diverged final check fails the run, and only when asked to
fn fails_run(final_verdict: Option<&Verdict>, fail_on_divergence: bool) -> bool {
    fail_on_divergence && final_verdict.map(|v| v.kind) == Some(VerdictKind::Diverged)
}
