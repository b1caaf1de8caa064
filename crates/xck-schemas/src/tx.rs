//! Transactions as decoded by the typed query path.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::hex::{opt_u64_quantity, u64_quantity};
use crate::{Address, Bytes, Quantity, B256};

/// EIP-1559 dynamic-fee envelope type.
pub const DYNAMIC_FEE_TX_TYPE: u64 = 2;

/// Celo fee-currency envelopes (0x7a, 0x7b, 0x7c). All carry fee caps.
pub const CELO_FEE_CURRENCY_TX_TYPES: [u64; 3] = [0x7a, 0x7b, 0x7c];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessListItem {
    pub address: Address,
    #[serde(default)]
    pub storage_keys: Vec<B256>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: B256,
    #[serde(rename = "type", default, with = "u64_quantity")]
    pub tx_type: u64,
    #[serde(with = "u64_quantity")]
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<Quantity>,
    #[serde(with = "u64_quantity")]
    pub gas: u64,
    #[serde(default)]
    pub to: Option<Address>,
    pub value: Quantity,
    pub input: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<Vec<AccessListItem>>,
    #[serde(
        default,
        with = "opt_u64_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub chain_id: Option<u64>,
    pub v: Quantity,
    pub r: Quantity,
    pub s: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_currency: Option<Address>,
    /// Local wall-clock time the decoder first saw this transaction.
    /// Never on the wire.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Envelope priced by a fee cap and a tip cap instead of a gas price.
    pub fn is_dynamic_fee(&self) -> bool {
        self.tx_type == DYNAMIC_FEE_TX_TYPE || CELO_FEE_CURRENCY_TX_TYPES.contains(&self.tx_type)
    }

    /// Price per gas as the envelope reports it. Dynamic-fee transactions
    /// report their fee cap.
    pub fn gas_price(&self) -> Option<&Quantity> {
        if self.is_dynamic_fee() {
            self.max_fee_per_gas.as_ref()
        } else {
            self.gas_price.as_ref()
        }
    }

    pub fn gas_fee_cap(&self) -> Option<&Quantity> {
        if self.is_dynamic_fee() {
            self.max_fee_per_gas.as_ref()
        } else {
            self.gas_price.as_ref()
        }
    }

    pub fn gas_tip_cap(&self) -> Option<&Quantity> {
        if self.is_dynamic_fee() {
            self.max_priority_fee_per_gas.as_ref()
        } else {
            self.gas_price.as_ref()
        }
    }

    /// Replay-protected signature. Typed envelopes always are; legacy ones are
    /// when `v` encodes a chain id.
    pub fn is_protected(&self) -> bool {
        if self.tx_type != 0 {
            return true;
        }
        match self.v.to_u64() {
            Some(0 | 1 | 27 | 28) => false,
            _ => true,
        }
    }

    /// Chain id the signature commits to. Legacy envelopes derive it from `v`.
    pub fn effective_chain_id(&self) -> Option<BigUint> {
        if self.tx_type != 0 {
            return self.chain_id.map(BigUint::from);
        }
        if !self.is_protected() {
            return Some(BigUint::from(0u32));
        }
        let v = &self.v.0;
        if *v < BigUint::from(35u32) {
            return None;
        }
        Some((v - BigUint::from(35u32)) / BigUint::from(2u32))
    }

    pub fn stamp_seen_at(&mut self, at: DateTime<Utc>) {
        if self.seen_at.is_none() {
            self.seen_at = Some(at);
        }
    }

    /// Reset the local observation time to the shared sentinel so two
    /// independently decoded copies compare equal.
    pub fn normalize_seen_at(&mut self) {
        self.seen_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy(v: u64) -> Transaction {
        Transaction {
            v: Quantity::from_u64(v),
            gas_price: Some(Quantity::from_u64(7)),
            ..Transaction::default()
        }
    }

    #[test]
    fn legacy_chain_id_comes_from_v() {
        let tx = legacy(42220 * 2 + 35);
        assert!(tx.is_protected());
        assert_eq!(tx.effective_chain_id(), Some(BigUint::from(42220u32)));

        let unprotected = legacy(27);
        assert!(!unprotected.is_protected());
        assert_eq!(unprotected.effective_chain_id(), Some(BigUint::from(0u32)));
    }

    #[test]
    fn dynamic_fee_gas_price_is_fee_cap() {
        let tx = Transaction {
            tx_type: DYNAMIC_FEE_TX_TYPE,
            max_fee_per_gas: Some(Quantity::from_u64(100)),
            max_priority_fee_per_gas: Some(Quantity::from_u64(2)),
            chain_id: Some(44787),
            ..Transaction::default()
        };
        assert_eq!(tx.gas_price(), Some(&Quantity::from_u64(100)));
        assert_eq!(tx.gas_tip_cap(), Some(&Quantity::from_u64(2)));
        assert_eq!(tx.effective_chain_id(), Some(BigUint::from(44787u32)));
        assert!(tx.is_protected());
    }

    #[test]
    fn seen_at_is_never_decoded() {
        let raw = serde_json::json!({
            "hash": B256::zero().to_string(),
            "type": "0x0",
            "nonce": "0x1",
            "gasPrice": "0x5",
            "gas": "0x5208",
            "to": null,
            "value": "0x0",
            "input": "0x",
            "v": "0x1b",
            "r": "0x1",
            "s": "0x2",
            "seenAt": "2020-01-01T00:00:00Z"
        });
        let mut tx: Transaction = serde_json::from_value(raw).unwrap();
        assert!(tx.seen_at.is_none());
        tx.stamp_seen_at(Utc::now());
        assert!(tx.seen_at.is_some());
        tx.normalize_seen_at();
        assert!(tx.seen_at.is_none());
    }
}
