//! Scenario: Dangling State Tolerated
//!
//! # Invariants under test
//!
//! 1. A receipt whose only difference is a gas price the legacy node reports
//!    and the migrated node omits passes, and the run reports exactly one
//!    dangling-state warning naming that block and receipt.
//! 2. The same asymmetry reported as an explicit `null` by the migrated node
//!    is tolerated the same way.
//! 3. Any other difference in the same receipt still fails the run at that
//!    block.
//! 4. With the exception disabled the asymmetry fails the run.

use serde_json::Value;
use xck_compare::{Comparator, Rule, RuleSet, Warning};
use xck_reconcile::{FailureKind, ReconcileConfig, ReconcileError, Reconciler, RunSummary};
use xck_testkit::{sources, ChainFixture, NodeData, Pair};

const DANGLING: u64 = 41;

fn nodes(edit: impl Fn(&mut serde_json::Map<String, Value>)) -> Pair<NodeData> {
    let mut nodes = ChainFixture::new(44787).build(40..=43);
    nodes.candidate.block_mut(DANGLING).edit_receipt(0, edit);
    nodes
}

async fn run(nodes: Pair<NodeData>, rules: RuleSet) -> Result<RunSummary, ReconcileError> {
    let mut cfg = ReconcileConfig::new(40, 43);
    cfg.window_size = 2;
    Reconciler::new(sources(nodes), Comparator::new(rules, 0), cfg)
        .run()
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_gas_price_is_a_warning() {
    let nodes = nodes(|r| {
        r.remove("effectiveGasPrice");
    });
    let summary = run(nodes, RuleSet::all()).await.unwrap();
    assert_eq!(summary.verified, 4);
    assert_eq!(
        summary.warnings,
        vec![Warning::DanglingState {
            unit: DANGLING,
            index: 0
        }]
    );
    assert_eq!(
        summary.warnings[0].to_string(),
        format!("dangling state at block {} (receipt 0 of block {DANGLING})", DANGLING - 1)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn null_gas_price_is_a_warning() {
    let nodes = nodes(|r| {
        r.insert("effectiveGasPrice".into(), Value::Null);
    });
    let summary = run(nodes, RuleSet::all()).await.unwrap();
    assert_eq!(summary.warnings.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn other_difference_in_same_receipt_still_fails() {
    let nodes = nodes(|r| {
        r.remove("effectiveGasPrice");
        r.insert("status".into(), Value::String("0x0".into()));
    });
    let err = run(nodes, RuleSet::all()).await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Comparison);
    assert_eq!(err.unit, Some(DANGLING));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disabled_exception_fails() {
    let nodes = nodes(|r| {
        r.remove("effectiveGasPrice");
    });
    let err = run(nodes, RuleSet::all().without(Rule::DanglingState))
        .await
        .unwrap_err();
    assert_eq!(err.unit, Some(DANGLING));
    let mismatch = err.comparison().expect("comparison failure");
    assert_eq!(mismatch.label, "raw receipt 0");
    assert_eq!(mismatch.path, "$.effectiveGasPrice");
}
