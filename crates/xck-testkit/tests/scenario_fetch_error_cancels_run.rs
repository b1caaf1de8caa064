//! Scenario: Fetch Error Cancels Run
//!
//! # Invariants under test
//!
//! 1. A fetch failure at block k ends the run with a fetch failure naming k.
//! 2. No block above k reaches the verified state once k has failed.
//! 3. The terminal error carries the contiguous cursor reached before k.
//! 4. A failing window aggregate ends the run with the window index.
//! 5. Cancelling the run's token from outside stops it with a cancellation,
//!    not a hang.
//! 6. A failing aggregate stops the run as soon as it fails, not when the
//!    window's last block is verified.

use std::time::Duration;

use xck_compare::{Comparator, RuleSet};
use xck_fetch::FetchError;
use xck_reconcile::{FailureCause, FailureKind, ReconcileConfig, Reconciler};
use xck_schemas::Role;
use xck_source::methods;
use xck_testkit::{ChainFixture, FakeSource, Pair};

const FAILING: u64 = 103;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_at_k_stops_everything_above_k() {
    let nodes = ChainFixture::new(42220).build(100..=120);
    let slow = Duration::from_millis(300);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .delay_units(FAILING + 1, 120, slow)
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate)
            .delay_units(FAILING + 1, 120, slow)
            .fail(Some(methods::BLOCK_BY_NUMBER), Some(FAILING), "header not found")
            .into_source(Role::Candidate),
    );
    let mut cfg = ReconcileConfig::new(100, 120);
    cfg.window_size = 50;
    let reconciler = Reconciler::new(sources, Comparator::new(RuleSet::all(), 0), cfg);
    let stats = reconciler.stats();

    let err = reconciler.run().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Fetch);
    assert_eq!(err.unit, Some(FAILING));
    match &err.cause {
        FailureCause::Fetch(FetchError::Source { role, .. }) => assert_eq!(*role, Role::Candidate),
        other => panic!("expected a source failure, got {other:?}"),
    }
    assert!(
        stats.highest_verified().map_or(true, |h| h < FAILING),
        "verified past the failing block: {:?}",
        stats.highest_verified()
    );
    assert!(err.contiguous.map_or(true, |c| c < FAILING));
    assert!(err.to_string().contains("at block 103"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_aggregate_names_its_window() {
    let nodes = ChainFixture::new(42220).build(0..=5);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .fail(Some(methods::GET_LOGS), Some(3), "query timeout exceeded")
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate).into_source(Role::Candidate),
    );
    let mut cfg = ReconcileConfig::new(0, 5);
    cfg.window_size = 3;

    let err = Reconciler::new(sources, Comparator::new(RuleSet::all(), 0), cfg)
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Fetch);
    assert_eq!(err.window, Some(1));
    assert_eq!(err.unit, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_aggregate_stops_the_run_before_its_window_fills() {
    let nodes = ChainFixture::new(42220).build(0..=19);
    let slow = Duration::from_millis(100);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .delay_units(1, 19, slow)
            .fail(Some(methods::GET_LOGS), Some(0), "logs unavailable")
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate)
            .delay_units(1, 19, slow)
            .into_source(Role::Candidate),
    );
    let mut cfg = ReconcileConfig::new(0, 19);
    cfg.window_size = 20;
    let reconciler = Reconciler::new(sources, Comparator::new(RuleSet::all(), 0), cfg);
    let stats = reconciler.stats();

    let err = tokio::time::timeout(Duration::from_secs(5), reconciler.run())
        .await
        .expect("run must stop")
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Fetch);
    assert_eq!(err.window, Some(0));
    assert!(err.to_string().contains("logs unavailable"), "{err}");
    assert!(
        stats.verified() < 20,
        "all {} blocks verified after the aggregate had failed",
        stats.verified()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn external_cancel_stops_the_run() {
    let nodes = ChainFixture::new(42220).build(0..=9);
    let slow = Duration::from_secs(30);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .delay_units(0, 9, slow)
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate)
            .delay_units(0, 9, slow)
            .into_source(Role::Candidate),
    );
    let reconciler = Reconciler::new(
        sources,
        Comparator::new(RuleSet::all(), 0),
        ReconcileConfig::new(0, 9),
    );
    let cancel = reconciler.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), reconciler.run())
        .await
        .expect("cancelled run must return promptly")
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.contiguous, None);
}
