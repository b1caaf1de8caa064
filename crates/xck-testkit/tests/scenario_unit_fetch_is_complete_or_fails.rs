//! Scenario: Unit Fetch Is Complete Or Fails
//!
//! # Invariants under test
//!
//! 1. A successful unit fetch carries every facet from both nodes: one entry
//!    per transaction in each per-transaction vector.
//! 2. A failing facet fails the whole fetch, annotated with the node role and
//!    the facet, and keeps the node's error.
//! 3. A unit fetch past its deadline fails with a unit timeout naming the
//!    block.
//! 4. The aggregate fetch returns the logs of exactly its window, from both
//!    nodes, and fails with a window timeout when past its deadline.
//! 5. A fetch observes cancellation.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use xck_fetch::{fetch_aggregate, fetch_unit, FetchError, FetchLimits};
use xck_schemas::Role;
use xck_source::{methods, SourceError};
use xck_testkit::{sources, ChainFixture, FakeSource, Pair, INJECTED_ERROR_CODE};

fn limits(unit_timeout: Duration) -> FetchLimits {
    FetchLimits {
        unit_timeout,
        window_timeout: unit_timeout,
        ..FetchLimits::default()
    }
}

#[tokio::test]
async fn observation_carries_every_facet() {
    let nodes = ChainFixture::new(42220).with_txs_per_block(3).build(7..=7);
    let expected_logs = nodes.reference.blocks[&7].logs().len();
    let obs = fetch_unit(&sources(nodes), 7, &FetchLimits::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(obs.unit, 7);
    assert_eq!(obs.tx_count(), 3);
    assert_eq!(obs.candidate_by_number.hash(), obs.candidate_by_hash.hash());
    for role in [Role::Reference, Role::Candidate] {
        assert_eq!(obs.txs.get(role).len(), 3, "{role}");
        assert_eq!(obs.raw_txs.get(role).len(), 3, "{role}");
        assert_eq!(obs.receipts.get(role).len(), 3, "{role}");
        assert_eq!(obs.raw_receipts.get(role).len(), 3, "{role}");
        assert!(obs.raw_by_number.get(role).is_object(), "{role}");
        assert!(obs.raw_by_hash.get(role).is_object(), "{role}");
        assert!(obs.raw_block_receipts.get(role).is_array(), "{role}");
    }
    // Odd blocks carry no synthetic logs, so receipts hold every log.
    let receipt_logs: usize = obs.receipts.reference.iter().map(|r| r.logs.len()).sum();
    assert_eq!(receipt_logs, expected_logs);
}

#[tokio::test]
async fn failing_facet_is_annotated() {
    let nodes = ChainFixture::new(42220).build(7..=7);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .fail(Some(methods::BLOCK_RECEIPT), Some(7), "missing trie node")
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate).into_source(Role::Candidate),
    );
    let err = fetch_unit(&sources, 7, &FetchLimits::default(), &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        FetchError::Source { role, facet, source } => {
            assert_eq!(role, Role::Reference);
            assert_eq!(facet, methods::BLOCK_RECEIPT);
            match source {
                SourceError::Rpc { code, message } => {
                    assert_eq!(code, INJECTED_ERROR_CODE);
                    assert_eq!(message, "missing trie node");
                }
                other => panic!("expected an rpc error, got {other:?}"),
            }
        }
        other => panic!("expected a source failure, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_unit_times_out() {
    let nodes = ChainFixture::new(42220).build(7..=7);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .delay_units(7, 7, Duration::from_secs(10))
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate).into_source(Role::Candidate),
    );
    let err = fetch_unit(&sources, 7, &limits(Duration::from_millis(50)), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::UnitTimeout { unit: 7, .. }), "{err:?}");
    assert!(err.to_string().starts_with("block 7:"));
}

#[tokio::test]
async fn cancelled_unit_fetch_returns_promptly() {
    let nodes = ChainFixture::new(42220).build(7..=7);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .delay_units(7, 7, Duration::from_secs(10))
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate).into_source(Role::Candidate),
    );
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fetch_unit(&sources, 7, &FetchLimits::default(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn aggregate_covers_exactly_its_window() {
    let nodes = ChainFixture::new(42220).build(10..=19);
    let expected: usize = (12..15).map(|u| nodes.reference.blocks[&u].logs().len()).sum();
    let agg = fetch_aggregate(
        &sources(nodes),
        12,
        15,
        Duration::from_secs(5),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(agg.typed.reference.len(), expected);
    assert_eq!(agg.typed.reference, agg.typed.candidate);
    assert!(agg.typed.reference.iter().all(|l| (12..15).contains(&l.block_number)));
    assert_eq!(agg.raw.reference.as_array().map(Vec::len), Some(expected));
}

#[tokio::test]
async fn slow_aggregate_times_out() {
    let nodes = ChainFixture::new(42220).build(10..=19);
    let sources = Pair::new(
        FakeSource::new(nodes.reference)
            .delay_method(methods::GET_LOGS, Duration::from_secs(10))
            .into_source(Role::Reference),
        FakeSource::new(nodes.candidate).into_source(Role::Candidate),
    );
    let err = fetch_aggregate(&sources, 10, 20, Duration::from_millis(50), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FetchError::WindowTimeout { start: 10, end: 20, .. }),
        "{err:?}"
    );
}
