//! Per-block verification.
//!
//! Runs on the consumption loop, once per fetched block, in this order:
//! blocks, transactions, receipts, block receipts, synthetic block receipt.
//! The first failing check ends verification. On success the block's
//! contribution to its window is the logs of the reference block receipts.

use std::collections::BTreeSet;

use serde_json::Value;
use xck_compare::{raw, CompareError, Comparator, Field, ProtocolDecodeError, Warning};
use xck_fetch::Observation;
use xck_schemas::{Log, Receipt, UnitKey, B256};

use crate::error::{FailureCause, InvariantViolation};

/// A verified block.
#[derive(Debug, Clone, PartialEq)]
pub struct Verified {
    pub unit: UnitKey,
    /// Logs of the reference block receipts, in receipt order.
    pub logs: Vec<Log>,
    pub warnings: Vec<Warning>,
}

/// Verify everything fetched for one block. Consumes the observation.
pub fn verify_unit(comparator: &Comparator, mut obs: Observation) -> Result<Verified, FailureCause> {
    let unit = obs.unit;
    check_shape(&obs)?;

    let mut warnings = Vec::new();
    let at_unit = |e: CompareError| FailureCause::from(e.with_unit(unit));
    verify_blocks(comparator, &mut obs).map_err(at_unit)?;
    verify_transactions(comparator, &mut obs).map_err(at_unit)?;
    let tolerated = verify_receipts(comparator, &obs, &mut warnings).map_err(at_unit)?;
    verify_block_receipts(comparator, &obs, &tolerated).map_err(at_unit)?;
    verify_block_receipt(comparator, &obs).map_err(at_unit)?;

    let logs = obs
        .block_receipts
        .reference
        .into_iter()
        .flat_map(|r| r.logs)
        .collect();
    Ok(Verified { unit, logs, warnings })
}

fn check_shape(obs: &Observation) -> Result<(), InvariantViolation> {
    let unit = obs.unit;
    if obs.candidate_by_number.number() != unit {
        return Err(InvariantViolation::new(format!(
            "block {unit}: candidate returned block {} by number",
            obs.candidate_by_number.number()
        )));
    }
    let n = obs.tx_count();
    let lengths = [
        ("reference transactions", obs.txs.reference.len()),
        ("candidate transactions", obs.txs.candidate.len()),
        ("reference raw transactions", obs.raw_txs.reference.len()),
        ("candidate raw transactions", obs.raw_txs.candidate.len()),
        ("reference receipts", obs.receipts.reference.len()),
        ("candidate receipts", obs.receipts.candidate.len()),
        ("reference raw receipts", obs.raw_receipts.reference.len()),
        ("candidate raw receipts", obs.raw_receipts.candidate.len()),
    ];
    for (what, len) in lengths {
        if len != n {
            return Err(InvariantViolation::new(format!(
                "block {unit}: {len} {what} for {n} transactions"
            )));
        }
    }
    Ok(())
}

fn raw_hash(record: &Value, what: &str) -> Result<B256, ProtocolDecodeError> {
    raw::require_str(record, "hash", what)?
        .parse()
        .map_err(|source| ProtocolDecodeError::Hex {
            what: what.to_string(),
            field: "hash".to_string(),
            source,
        })
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn verify_blocks(cmp: &Comparator, obs: &mut Observation) -> Result<(), CompareError> {
    let unit = obs.unit;
    for tx in obs
        .candidate_by_number
        .transactions
        .iter_mut()
        .chain(obs.candidate_by_hash.transactions.iter_mut())
    {
        tx.normalize_seen_at();
    }
    cmp.blocks("candidate block by number vs by hash", &obs.candidate_by_number, &obs.candidate_by_hash)?;

    let norm = cmp.normalizer();
    let ref_by_number = norm.reference_block(unit, &obs.raw_by_number.reference)?;
    let ref_by_hash = norm.reference_block(unit, &obs.raw_by_hash.reference)?;
    let cand_by_number = norm.candidate_block(&obs.raw_by_number.candidate)?;
    let cand_by_hash = norm.candidate_block(&obs.raw_by_hash.candidate)?;
    cmp.values("raw block by number", &ref_by_number, &cand_by_number)?;
    cmp.values("raw block by hash", &ref_by_hash, &cand_by_hash)?;
    cmp.values("reference raw block by number vs by hash", &ref_by_number, &ref_by_hash)?;

    let reported = raw_hash(&ref_by_number, "reference raw block")?;
    cmp.records(
        "reference block hash vs candidate derived hash",
        &reported,
        &obs.candidate_by_number.hash(),
    )?;

    let typed = &obs.candidate_by_number.transactions;
    let raw_txs = raw::require_array(&ref_by_number, "transactions", "reference raw block")?;
    cmp.records("reference raw block transaction count", &raw_txs.len(), &typed.len())?;
    for (i, (raw_tx, tx)) in raw_txs.iter().zip(typed).enumerate() {
        let hash = raw_hash(raw_tx, "reference raw block transaction")?;
        cmp.records(&format!("reference raw block transaction {i} hash"), &hash, &tx.hash)?;
    }
    Ok(())
}

fn verify_transactions(cmp: &Comparator, obs: &mut Observation) -> Result<(), CompareError> {
    for tx in obs.txs.reference.iter_mut().chain(obs.txs.candidate.iter_mut()) {
        tx.normalize_seen_at();
    }
    cmp.transactions("transactions", &obs.txs.reference, &obs.txs.candidate)?;

    let norm = cmp.normalizer();
    for (i, (r, c)) in obs.raw_txs.reference.iter().zip(&obs.raw_txs.candidate).enumerate() {
        cmp.values(
            &format!("raw transaction {i}"),
            &norm.reference_tx(r),
            &norm.candidate_tx(c),
        )?;
    }

    cmp.records(
        "reference transaction count vs raw",
        &obs.txs.reference.len(),
        &obs.raw_txs.reference.len(),
    )?;
    for (i, (tx, raw_tx)) in obs.txs.reference.iter().zip(&obs.raw_txs.reference).enumerate() {
        let hash = raw_hash(raw_tx, "reference raw transaction")?;
        cmp.records(&format!("reference transaction {i} hash vs raw"), &tx.hash, &hash)?;
    }

    cmp.transactions(
        "reference transactions vs candidate block",
        &obs.txs.reference,
        &obs.candidate_by_number.transactions,
    )?;
    Ok(())
}

/// Returns the receipt indices whose only difference was a tolerated
/// dangling-state gas price.
fn verify_receipts(
    cmp: &Comparator,
    obs: &Observation,
    warnings: &mut Vec<Warning>,
) -> Result<BTreeSet<usize>, CompareError> {
    let unit = obs.unit;
    let candidate_raw = cmp.normalizer().candidate_receipts(&obs.raw_receipts.candidate);
    cmp.records(
        "raw receipt count",
        &obs.raw_receipts.reference.len(),
        &candidate_raw.len(),
    )?;

    let mut tolerated = BTreeSet::new();
    for (i, (r, c)) in obs.raw_receipts.reference.iter().zip(&candidate_raw).enumerate() {
        if let Some(warning) = cmp.raw_receipt(unit, i, r, c)? {
            warnings.push(warning);
            tolerated.insert(i);
        }
    }

    cmp.records(
        "receipts",
        without_gas_price(&obs.receipts.reference, &tolerated).as_slice(),
        without_gas_price(&obs.receipts.candidate, &tolerated).as_slice(),
    )?;

    let reference_raw = Value::Array(obs.raw_receipts.reference.clone());
    let decoded: Vec<Receipt> = raw::decode(&reference_raw, "reference raw receipts")?;
    cmp.records(
        "reference receipts vs decoded raw",
        obs.receipts.reference.as_slice(),
        decoded.as_slice(),
    )?;
    Ok(tolerated)
}

fn verify_block_receipts(
    cmp: &Comparator,
    obs: &Observation,
    tolerated: &BTreeSet<usize>,
) -> Result<(), CompareError> {
    cmp.records(
        "block receipts",
        without_gas_price(&obs.block_receipts.reference, tolerated).as_slice(),
        without_gas_price(&obs.block_receipts.candidate, tolerated).as_slice(),
    )?;

    let candidate_raw = cmp
        .normalizer()
        .candidate_receipt_list(&obs.raw_block_receipts.candidate);
    cmp.values(
        "raw block receipts",
        &raw_without_gas_price(&obs.raw_block_receipts.reference, tolerated),
        &raw_without_gas_price(&candidate_raw, tolerated),
    )?;

    let decoded: Vec<Receipt> = raw::decode(&obs.raw_block_receipts.reference, "reference raw block receipts")?;
    cmp.records(
        "reference block receipts vs decoded raw",
        obs.block_receipts.reference.as_slice(),
        decoded.as_slice(),
    )?;
    Ok(())
}

/// The synthetic block receipt has no typed form. It must agree between the
/// nodes, and the reference block receipts must be the per-transaction
/// receipts followed by the synthetic one when (and only when) it has logs.
fn verify_block_receipt(cmp: &Comparator, obs: &Observation) -> Result<(), CompareError> {
    let synthetic = &obs.raw_block_receipt.reference;
    cmp.values("raw block receipt", synthetic, &obs.raw_block_receipt.candidate)?;

    let mut expected = obs.raw_receipts.reference.clone();
    let has_logs = Field::of(synthetic, "logs")
        .value()
        .and_then(Value::as_array)
        .is_some_and(|logs| !logs.is_empty());
    if has_logs {
        expected.push(synthetic.clone());
    }
    cmp.values(
        "reference block receipts vs receipts",
        &Value::Array(expected),
        &obs.raw_block_receipts.reference,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Dangling-state masking
// ---------------------------------------------------------------------------

fn without_gas_price(receipts: &[Receipt], tolerated: &BTreeSet<usize>) -> Vec<Receipt> {
    receipts
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut r = r.clone();
            if tolerated.contains(&i) {
                r.effective_gas_price = None;
            }
            r
        })
        .collect()
}

fn raw_without_gas_price(list: &Value, tolerated: &BTreeSet<usize>) -> Value {
    let mut out = list.clone();
    if let Value::Array(items) = &mut out {
        for i in tolerated {
            if let Some(Value::Object(map)) = items.get_mut(*i) {
                map.remove("effectiveGasPrice");
            }
        }
    }
    out
}
