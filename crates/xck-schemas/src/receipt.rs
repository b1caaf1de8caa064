//! Receipts and event logs.

use serde::{Deserialize, Serialize};

use crate::hex::{opt_u64_quantity, u64_quantity};
use crate::{Address, Bytes, Quantity, B256};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(with = "u64_quantity")]
    pub block_number: u64,
    pub transaction_hash: B256,
    #[serde(with = "u64_quantity")]
    pub transaction_index: u64,
    pub block_hash: B256,
    #[serde(with = "u64_quantity")]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(rename = "type", default, with = "u64_quantity")]
    pub tx_type: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Bytes>,
    #[serde(
        default,
        with = "opt_u64_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<u64>,
    #[serde(with = "u64_quantity")]
    pub cumulative_gas_used: u64,
    pub logs_bloom: Bytes,
    #[serde(default)]
    pub logs: Vec<Log>,
    pub transaction_hash: B256,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(with = "u64_quantity")]
    pub gas_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_gas_price: Option<Quantity>,
    pub block_hash: B256,
    #[serde(with = "u64_quantity")]
    pub block_number: u64,
    #[serde(with = "u64_quantity")]
    pub transaction_index: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_receipt_with_logs() {
        let raw = serde_json::json!({
            "type": "0x2",
            "status": "0x1",
            "cumulativeGasUsed": "0xa410",
            "logsBloom": "0x00",
            "logs": [{
                "address": Address::zero().to_string(),
                "topics": [B256::zero().to_string()],
                "data": "0x01",
                "blockNumber": "0x64",
                "transactionHash": B256::zero().to_string(),
                "transactionIndex": "0x0",
                "blockHash": B256::zero().to_string(),
                "logIndex": "0x3",
                "removed": false
            }],
            "transactionHash": B256::zero().to_string(),
            "contractAddress": null,
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x9",
            "blockHash": B256::zero().to_string(),
            "blockNumber": "0x64",
            "transactionIndex": "0x0"
        });
        let r: Receipt = serde_json::from_value(raw).unwrap();
        assert_eq!(r.tx_type, 2);
        assert_eq!(r.status, Some(1));
        assert_eq!(r.logs.len(), 1);
        assert_eq!(r.logs[0].log_index, 3);
        assert_eq!(r.block_number, 100);
    }
}
