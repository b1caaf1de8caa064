//! Domain-aware comparison for decoded blocks and transactions.
//!
//! Blocks compare their derived identity hash plus every header field, then
//! their transactions one by one. Transactions compare the fields that define
//! them (signature, fees, payload) rather than how the decoder happened to
//! populate optional representation fields.

use std::fmt::Debug;

use xck_schemas::{Block, Transaction};

use crate::error::ComparisonError;

fn field<T: PartialEq + Debug + ?Sized>(
    label: &str,
    path: &str,
    expected: &T,
    actual: &T,
) -> Result<(), ComparisonError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ComparisonError::new(
            label,
            path,
            format!("{expected:?}"),
            format!("{actual:?}"),
        ))
    }
}

/// Compare two decoded blocks. Forces the identity hash on both before
/// anything else, so a block whose hash was already read compares equal to a
/// freshly decoded one.
pub fn compare_blocks(label: &str, expected: &Block, actual: &Block) -> Result<(), ComparisonError> {
    let (eh, ah) = (expected.hash(), actual.hash());
    let (e, a) = (&expected.header, &actual.header);

    field(label, "number", &e.number, &a.number)?;
    field(label, "hash", &eh, &ah)?;
    field(label, "parentHash", &e.parent_hash, &a.parent_hash)?;
    field(label, "sha3Uncles", &e.uncle_hash, &a.uncle_hash)?;
    field(label, "miner", &e.miner, &a.miner)?;
    field(label, "stateRoot", &e.state_root, &a.state_root)?;
    field(label, "transactionsRoot", &e.transactions_root, &a.transactions_root)?;
    field(label, "receiptsRoot", &e.receipts_root, &a.receipts_root)?;
    field(label, "logsBloom", &e.logs_bloom, &a.logs_bloom)?;
    field(label, "difficulty", &e.difficulty, &a.difficulty)?;
    field(label, "gasLimit", &e.gas_limit, &a.gas_limit)?;
    field(label, "gasUsed", &e.gas_used, &a.gas_used)?;
    field(label, "timestamp", &e.timestamp, &a.timestamp)?;
    field(label, "extraData", &e.extra_data, &a.extra_data)?;
    field(label, "mixHash", &e.mix_hash, &a.mix_hash)?;
    field(label, "nonce", &e.nonce, &a.nonce)?;
    field(label, "baseFeePerGas", &e.base_fee_per_gas, &a.base_fee_per_gas)?;
    field(label, "withdrawalsRoot", &e.withdrawals_root, &a.withdrawals_root)?;
    field(label, "blobGasUsed", &e.blob_gas_used, &a.blob_gas_used)?;
    field(label, "excessBlobGas", &e.excess_blob_gas, &a.excess_blob_gas)?;
    field(
        label,
        "parentBeaconBlockRoot",
        &e.parent_beacon_block_root,
        &a.parent_beacon_block_root,
    )?;
    field(label, "uncles", &expected.uncles, &actual.uncles)?;

    compare_transaction_lists(label, &expected.transactions, &actual.transactions)
}

pub fn compare_transaction_lists(
    label: &str,
    expected: &[Transaction],
    actual: &[Transaction],
) -> Result<(), ComparisonError> {
    field(label, "transactions.len", &expected.len(), &actual.len())?;
    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        compare_transactions(label, e, a).map_err(|mut err| {
            err.path = format!("transactions[{i}].{}", err.path);
            err.diff = format!("- {}: {}\n+ {}: {}", err.path, err.expected, err.path, err.actual);
            err
        })?;
    }
    Ok(())
}

/// Compare two decoded transactions. Observation timestamps must already be
/// reset with [`Transaction::normalize_seen_at`] on both sides.
pub fn compare_transactions(
    label: &str,
    expected: &Transaction,
    actual: &Transaction,
) -> Result<(), ComparisonError> {
    field(label, "hash", &expected.hash, &actual.hash)?;
    field(label, "type", &expected.tx_type, &actual.tx_type)?;
    field(label, "nonce", &expected.nonce, &actual.nonce)?;
    field(label, "gasPrice", &expected.gas_price(), &actual.gas_price())?;
    field(label, "gasFeeCap", &expected.gas_fee_cap(), &actual.gas_fee_cap())?;
    field(label, "gasTipCap", &expected.gas_tip_cap(), &actual.gas_tip_cap())?;
    field(label, "maxFeePerGas", &expected.max_fee_per_gas, &actual.max_fee_per_gas)?;
    field(
        label,
        "maxPriorityFeePerGas",
        &expected.max_priority_fee_per_gas,
        &actual.max_priority_fee_per_gas,
    )?;
    field(label, "feeCurrency", &expected.fee_currency, &actual.fee_currency)?;
    field(label, "gas", &expected.gas, &actual.gas)?;
    field(label, "to", &expected.to, &actual.to)?;
    field(label, "value", &expected.value, &actual.value)?;
    field(label, "input", &expected.input, &actual.input)?;
    field(label, "accessList", &expected.access_list, &actual.access_list)?;
    field(
        label,
        "chainId",
        &expected.effective_chain_id(),
        &actual.effective_chain_id(),
    )?;
    field(label, "protected", &expected.is_protected(), &actual.is_protected())?;
    field(label, "v", &expected.v, &actual.v)?;
    field(label, "r", &expected.r, &actual.r)?;
    field(label, "s", &expected.s, &actual.s)?;
    field(label, "seenAt", &expected.seen_at, &actual.seen_at)
}
