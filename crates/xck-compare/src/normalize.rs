//! Raw-record normalization.
//!
//! Each function takes a raw record and returns a normalized copy; the
//! original is never touched. Applying any of them to its own output yields
//! the same output.

use serde_json::Value;
use xck_schemas::hex::{decode_prefixed, encode_prefixed};
use xck_schemas::UnitKey;

use crate::error::ProtocolDecodeError;
use crate::extra::strip_aggregated_seal;
use crate::raw::{require_object_mut, require_str, Field};
use crate::rules::{Rule, RuleSet};

/// Header fields the candidate still reports on pre-boundary blocks while the
/// legacy node never had them.
pub const BOUNDARY_GROUP_FIELDS: [&str; 5] = ["uncles", "sha3Uncles", "mixHash", "nonce", "gasLimit"];

/// Reference-only block fields for concepts the migrated chain removed.
pub const REMOVED_CONCEPT_FIELDS: [&str; 2] = ["randomness", "epochSnarkData"];

#[derive(Debug, Clone)]
pub struct Normalizer {
    rules: RuleSet,
    /// First block number of the upgraded header layout.
    boundary: UnitKey,
}

fn remove(record: &mut Value, key: &str) {
    if let Some(map) = record.as_object_mut() {
        map.remove(key);
    }
}

impl Normalizer {
    pub fn new(rules: RuleSet, boundary: UnitKey) -> Self {
        Self { rules, boundary }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn boundary(&self) -> UnitKey {
        self.boundary
    }

    fn on(&self, rule: Rule) -> bool {
        self.rules.is_enabled(rule)
    }

    /// Normalize a raw legacy-node block for block `unit`. A `null` block
    /// stays `null`.
    pub fn reference_block(&self, unit: UnitKey, block: &Value) -> Result<Value, ProtocolDecodeError> {
        if block.is_null() {
            return Ok(Value::Null);
        }
        let mut out = block.clone();
        require_object_mut(&mut out, "reference block")?;

        if self.on(Rule::Size) {
            remove(&mut out, "size");
        }
        if self.on(Rule::RemovedConcepts) {
            for key in REMOVED_CONCEPT_FIELDS {
                remove(&mut out, key);
            }
        }
        if self.on(Rule::LegacyGasLimit) && unit < self.boundary {
            remove(&mut out, "gasLimit");
        }
        if let Some(Value::Array(txs)) = out.get_mut("transactions") {
            for tx in txs.iter_mut() {
                if tx.is_object() {
                    *tx = self.reference_tx(tx);
                }
            }
        }
        if self.on(Rule::AggregatedSeal) {
            let extra = require_str(&out, "extraData", "reference block")?;
            let bytes = decode_prefixed(extra.trim()).map_err(|source| ProtocolDecodeError::Hex {
                what: "reference block".to_string(),
                field: "extraData".to_string(),
                source,
            })?;
            let rewritten = encode_prefixed(&strip_aggregated_seal(&bytes)?);
            if let Some(map) = out.as_object_mut() {
                map.insert("extraData".to_string(), Value::String(rewritten));
            }
        }
        Ok(out)
    }

    /// Normalize a raw migrated-node block. A `null` block stays `null`.
    pub fn candidate_block(&self, block: &Value) -> Result<Value, ProtocolDecodeError> {
        if block.is_null() {
            return Ok(Value::Null);
        }
        let mut out = block.clone();
        require_object_mut(&mut out, "candidate block")?;

        if self.on(Rule::Size) {
            remove(&mut out, "size");
        }
        if let Some(Value::Array(txs)) = out.get_mut("transactions") {
            for tx in txs.iter_mut() {
                if tx.is_object() {
                    *tx = self.candidate_tx(tx);
                }
            }
        }
        if self.on(Rule::BoundaryGroup) && Field::of(&out, "gasLimit").as_str() == Some("0x0") {
            for key in BOUNDARY_GROUP_FIELDS {
                remove(&mut out, key);
            }
        }
        Ok(out)
    }

    pub fn reference_tx(&self, tx: &Value) -> Value {
        let mut out = tx.clone();
        if self.on(Rule::TxChainId) {
            remove(&mut out, "chainId");
        }
        if self.on(Rule::TxEthCompatible)
            && Field::of(&out, "type").as_str() == Some("0x0")
            && Field::of(&out, "ethCompatible").as_bool() == Some(true)
        {
            remove(&mut out, "ethCompatible");
        }
        if self.on(Rule::TxGatewayFee) {
            remove(&mut out, "gatewayFee");
        }
        out
    }

    pub fn candidate_tx(&self, tx: &Value) -> Value {
        let mut out = tx.clone();
        if self.on(Rule::TxChainId) {
            remove(&mut out, "chainId");
        }
        if self.on(Rule::TxYParity) {
            remove(&mut out, "yParity");
        }
        if self.on(Rule::TxGatewayFee) {
            remove(&mut out, "gatewayFee");
        }
        out
    }

    pub fn candidate_receipt(&self, receipt: &Value) -> Value {
        let mut out = receipt.clone();
        if self.on(Rule::ReceiptNullGasPrice) && Field::of(&out, "effectiveGasPrice") == Field::Null {
            remove(&mut out, "effectiveGasPrice");
        }
        out
    }

    pub fn candidate_receipts(&self, receipts: &[Value]) -> Vec<Value> {
        receipts.iter().map(|r| self.candidate_receipt(r)).collect()
    }

    /// Normalize a raw receipt list as returned by a single call (a JSON array
    /// or `null`).
    pub fn candidate_receipt_list(&self, receipts: &Value) -> Value {
        match receipts {
            Value::Array(items) => Value::Array(self.candidate_receipts(items)),
            other => other.clone(),
        }
    }
}
