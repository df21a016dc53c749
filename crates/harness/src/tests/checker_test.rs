//! Checker scenario tests
//!
//! Covers the behavior of a consistency check running against a live
//! generator:
//! - No insert lands while a check holds the gate, under either settle strategy
//! - Verdict shapes for converged, diverged, absent and too-small sets
//! - Removed nodes drop out of later checks and come back when re-added
//! - The gate is returned after failing or panicking node queries

use std::sync::Arc;
use std::time::Duration;

use super::fakes::{RecordingNode, Script, ScriptedNode};
use crate::{
    CheckerConfig, ConsistencyChecker, EventSink, ExclusionGate, ExecutionError,
    ExecutionErrorKind, GeneratorConfig, MarkdownReport, NullSink, Observed, ReplicaSet, Settle,
    VerdictKind, WriteGenerator,
};

const QUICK_SETTLE: Settle = Settle::Fixed(Duration::from_millis(5));

fn checker(set: &ReplicaSet, gate: &ExclusionGate, settle: Settle) -> ConsistencyChecker {
    ConsistencyChecker::new(
        set.clone(),
        gate.clone(),
        CheckerConfig::default().with_settle(settle),
        Arc::new(NullSink),
    )
}

fn three_nodes(a: u64, b: u64, c: u64) -> (ReplicaSet, Arc<ScriptedNode>) {
    let set = ReplicaSet::new("primary", ScriptedNode::count("primary", a));
    set.add_node("replica-one", ScriptedNode::count("replica-one", b))
        .unwrap();
    let two = ScriptedNode::count("replica-two", c);
    set.add_node("replica-two", two.clone()).unwrap();
    (set, two)
}

#[tokio::test]
async fn test_no_insert_during_check_window() {
    let primary = RecordingNode::new("primary", Duration::from_millis(25));
    let set = ReplicaSet::new("primary", primary.clone());
    set.add_node(
        "replica-one",
        ScriptedNode::count("replica-one", 0).with_lag(vec![Some(0)]),
    )
    .unwrap();

    let gate = ExclusionGate::new();
    let config = GeneratorConfig::default().with_interval(Duration::from_millis(2));
    let handle = WriteGenerator::new(primary.clone(), gate.clone(), config).spawn();

    let checker = checker(
        &set,
        &gate,
        Settle::LagProbe {
            poll: Duration::from_millis(5),
            timeout: Duration::from_millis(200),
            fallback: Duration::from_millis(5),
        },
    );

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(15)).await;
        let verdict = checker.check_consistency(&["primary", "replica-one"]).await.unwrap();
        assert!(verdict.count("primary").is_some());
    }

    let stats = handle.stop().await;
    assert!(stats.inserted > 0, "generator never inserted");
    assert!(stats.skipped > 0, "generator never observed a held gate");
    assert_eq!(primary.violations.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Opens the primary's window when the checker announces a check, which it
/// does only once the gate is held
struct WindowOnCheck {
    primary: Arc<RecordingNode>,
    gate: ExclusionGate,
    unheld_announcements: std::sync::atomic::AtomicU64,
}

impl EventSink for WindowOnCheck {
    fn section(&self, _title: &str) {}

    fn line(&self, text: &str) {
        if text.starts_with("Checking replica data") {
            if !self.gate.is_held() {
                self.unheld_announcements
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            self.primary.open_window();
        }
    }

    fn block(&self, _text: &str) {}
}

#[tokio::test]
async fn test_no_insert_during_fixed_settle_window() {
    let primary = RecordingNode::new("primary", Duration::from_millis(10));
    let set = ReplicaSet::new("primary", primary.clone());
    set.add_node("replica-one", ScriptedNode::count("replica-one", 0))
        .unwrap();

    let gate = ExclusionGate::new();
    let config = GeneratorConfig::default().with_interval(Duration::from_millis(2));
    let handle = WriteGenerator::new(primary.clone(), gate.clone(), config).spawn();

    let sink = Arc::new(WindowOnCheck {
        primary: primary.clone(),
        gate: gate.clone(),
        unheld_announcements: Default::default(),
    });
    let checker = ConsistencyChecker::new(
        set,
        gate.clone(),
        CheckerConfig::default().with_settle(Settle::Fixed(Duration::from_millis(20))),
        sink.clone(),
    );

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(15)).await;
        checker.check_all().await.unwrap();
    }

    let stats = handle.stop().await;
    assert!(stats.inserted > 0, "generator never inserted");
    assert!(stats.skipped > 0, "generator never observed a held gate");
    assert_eq!(
        sink.unheld_announcements
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    assert_eq!(primary.violations.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_and_single_node_checks_are_inconclusive() {
    let (set, _) = three_nodes(42, 42, 42);
    let gate = ExclusionGate::new();
    let checker = checker(&set, &gate, QUICK_SETTLE);

    let empty: [&str; 0] = [];
    let verdict = checker.check_consistency(&empty).await.unwrap();
    assert_eq!(verdict.kind, VerdictKind::Inconclusive);
    assert!(verdict.observed.is_empty());

    let verdict = checker.check_consistency(&["replica-one"]).await.unwrap();
    assert_eq!(verdict.kind, VerdictKind::Inconclusive);
    assert_eq!(verdict.count("replica-one"), Some(42));

    // Duplicated names still count as one node
    let verdict = checker.check_consistency(&["primary", "primary"]).await.unwrap();
    assert_eq!(verdict.kind, VerdictKind::Inconclusive);
}

#[tokio::test]
async fn test_all_equal_counts_converge() {
    let (set, _) = three_nodes(42, 42, 42);
    let gate = ExclusionGate::new();
    let verdict = checker(&set, &gate, QUICK_SETTLE)
        .check_consistency(&["primary", "replica-one", "replica-two"])
        .await
        .unwrap();

    assert_eq!(verdict.kind, VerdictKind::Converged);
    assert_eq!(
        verdict.counts(),
        vec![("primary", 42), ("replica-one", 42), ("replica-two", 42)]
    );
    assert!(!gate.is_held());
}

#[tokio::test]
async fn test_lagging_replica_diverges() {
    let (set, _) = three_nodes(42, 42, 40);
    let gate = ExclusionGate::new();
    let verdict = checker(&set, &gate, QUICK_SETTLE).check_all().await.unwrap();

    assert_eq!(verdict.kind, VerdictKind::Diverged);
    assert_eq!(verdict.count("replica-two"), Some(40));
}

#[tokio::test]
async fn test_failed_node_is_absent_not_divergent() {
    let (set, two) = three_nodes(42, 42, 40);
    two.set(Script::Fail);
    let gate = ExclusionGate::new();
    let verdict = checker(&set, &gate, QUICK_SETTLE).check_all().await.unwrap();

    assert_eq!(verdict.kind, VerdictKind::Converged);
    assert_eq!(verdict.absent(), vec!["replica-two"]);
    match &verdict.observed[2].1 {
        Observed::Absent(reason) => assert!(reason.contains("node is down")),
        other => panic!("expected absent, got {:?}", other),
    }
    assert!(gate.try_acquire().is_some());
}

#[tokio::test]
async fn test_non_numeric_count_is_absent() {
    let (set, two) = three_nodes(42, 42, 0);
    two.set(Script::Text("many".into()));
    let gate = ExclusionGate::new();
    let verdict = checker(&set, &gate, QUICK_SETTLE).check_all().await.unwrap();

    assert_eq!(verdict.kind, VerdictKind::Converged);
    assert_eq!(verdict.absent(), vec!["replica-two"]);

    let expected = ExecutionError::shape_mismatch(
        "replica-two",
        crate::DEFAULT_COUNT_SQL,
        "not a row count: many",
    );
    assert_eq!(
        verdict.observed[2].1,
        Observed::Absent(expected.to_string())
    );
    assert!(expected.to_string().contains(&ExecutionErrorKind::ShapeMismatch.to_string()));
}

#[tokio::test]
async fn test_removed_node_is_excluded_until_readded() {
    let (set, two) = three_nodes(42, 42, 7);
    let gate = ExclusionGate::new();
    let checker = checker(&set, &gate, QUICK_SETTLE);
    let everyone = ["primary", "replica-one", "replica-two"];

    let removed = set.remove_node("replica-two").unwrap();
    let verdict = checker.check_consistency(&everyone).await.unwrap();
    assert_eq!(verdict.kind, VerdictKind::Converged);
    assert_eq!(verdict.observed.len(), 2);
    assert_eq!(verdict.count("replica-two"), None);
    assert_eq!(two.queries.load(std::sync::atomic::Ordering::SeqCst), 0);

    set.add_node("replica-two", removed).unwrap();
    let verdict = checker.check_consistency(&everyone).await.unwrap();
    assert_eq!(verdict.kind, VerdictKind::Diverged);
    assert_eq!(verdict.count("replica-two"), Some(7));

    two.set(Script::Count(42));
    let verdict = checker.check_consistency(&everyone).await.unwrap();
    assert!(verdict.is_converged());
}

#[tokio::test]
async fn test_panicking_node_releases_gate() {
    let primary = RecordingNode::new("primary", Duration::from_millis(1));
    let set = ReplicaSet::new("primary", primary.clone());
    set.add_node("replica-one", ScriptedNode::new("replica-one", Script::Panic))
        .unwrap();

    let gate = ExclusionGate::new();
    let interval = Duration::from_millis(10);
    let handle = WriteGenerator::new(
        primary.clone(),
        gate.clone(),
        GeneratorConfig::default().with_interval(interval),
    )
    .spawn();

    let checker = Arc::new(checker(&set, &gate, QUICK_SETTLE));
    let result = tokio::spawn({
        let checker = checker.clone();
        async move { checker.check_all().await }
    })
    .await;
    assert!(result.unwrap_err().is_panic());
    assert!(!gate.is_held());

    let before = primary.inserts();
    tokio::time::sleep(interval * 3).await;
    assert!(primary.inserts() > before, "generator did not resume");

    handle.stop().await;
    assert!(gate.try_acquire().is_some());
}

#[tokio::test]
async fn test_check_narrates_counts_and_verdict() {
    let (set, two) = three_nodes(3, 3, 3);
    two.set(Script::Fail);
    let report = Arc::new(MarkdownReport::new());
    let checker = ConsistencyChecker::new(
        set,
        ExclusionGate::new(),
        CheckerConfig::default().with_settle(QUICK_SETTLE),
        report.clone(),
    );

    checker.check_all().await.unwrap();
    let text = report.render();
    assert!(text.contains("primary count: `3`"));
    assert!(text.contains("replica-one count: `3`"));
    assert!(text.contains("replica-two count: absent"));
    assert!(text.contains("Replica data is in sync"));
}

#[tokio::test]
async fn test_lag_probe_waits_for_catch_up() {
    let set = ReplicaSet::new(
        "primary",
        ScriptedNode::count("primary", 5).with_lag(vec![Some(0)]),
    );
    let replica = ScriptedNode::count("replica-one", 5).with_lag(vec![Some(3), Some(2), Some(1), Some(0)]);
    set.add_node("replica-one", replica.clone()).unwrap();

    let gate = ExclusionGate::new();
    let started = std::time::Instant::now();
    let verdict = checker(
        &set,
        &gate,
        Settle::LagProbe {
            poll: Duration::from_millis(20),
            timeout: Duration::from_secs(5),
            fallback: Duration::from_secs(5),
        },
    )
    .check_all()
    .await
    .unwrap();

    assert!(verdict.is_converged());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(60), "returned after {:?}", waited);
    assert!(waited < Duration::from_secs(5), "fell back to the fixed delay");
}

#[tokio::test]
async fn test_lag_probe_falls_back_without_lag_support() {
    // ScriptedNode reports no lag by default
    let (set, _) = three_nodes(1, 1, 1);
    let gate = ExclusionGate::new();
    let started = std::time::Instant::now();
    let verdict = checker(
        &set,
        &gate,
        Settle::LagProbe {
            poll: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            fallback: Duration::from_millis(40),
        },
    )
    .check_all()
    .await
    .unwrap();

    assert!(verdict.is_converged());
    assert!(started.elapsed() >= Duration::from_millis(40));
}
