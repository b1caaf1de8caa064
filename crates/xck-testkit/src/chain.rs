//! Deterministic two-node chain fixtures.
//!
//! [`ChainFixture::build`] produces what a legacy node and its migrated
//! successor would serve for a block range: identical ledgers, each rendered
//! with its own node's representational quirks. Every divergence between the
//! two renderings is one a normalization rule removes, so an untouched fixture
//! verifies cleanly. Tests then mutate the JSON to inject the divergence they
//! are about.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use num_bigint::BigUint;
use serde_json::{json, Value};
use xck_compare::{strip_aggregated_seal, AggregatedSeal, IstanbulExtra, ISTANBUL_EXTRA_VANITY};
use xck_schemas::hex::encode_prefixed;
use xck_schemas::{Address, BlockNonce, Bytes, Header, Pair, Quantity, Role, UnitKey, B256};

/// Gas limit the migrated node reports for every post-boundary block.
pub const GAS_LIMIT: u64 = 30_000_000;
/// What the legacy node reports as `gasLimit` on pre-boundary blocks.
pub const LEGACY_GAS_LIMIT: u64 = 20_000_000;
pub const GAS_PER_TX: u64 = 21_000;
pub const GAS_PRICE: u64 = 5;

/// Deterministic 32-byte value: a tag byte up front, `n` big-endian at the end.
pub fn word(tag: u8, n: u64) -> B256 {
    let mut out = [0u8; 32];
    out[0] = tag;
    out[24..].copy_from_slice(&n.to_be_bytes());
    B256(out)
}

fn address(tag: u8) -> Address {
    Address([tag; 20])
}

fn hex_u64(n: u64) -> Value {
    Value::String(format!("{n:#x}"))
}

fn zero_bloom() -> Value {
    Value::String(encode_prefixed(&[0u8; 256]))
}

// ---------------------------------------------------------------------------
// Served data
// ---------------------------------------------------------------------------

/// Everything one node serves about one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    /// `eth_getBlockByNumber` / `eth_getBlockByHash` with full transactions.
    pub block: Value,
    /// `eth_getTransactionByHash`, in block order.
    pub txs: Vec<Value>,
    /// `eth_getTransactionReceipt`, in block order.
    pub receipts: Vec<Value>,
    /// `eth_getBlockReceipt`.
    pub block_receipt: Value,
}

impl BlockData {
    pub fn hash(&self) -> Option<&str> {
        self.block.get("hash").and_then(Value::as_str)
    }

    fn synthetic_logs(&self) -> &[Value] {
        self.block_receipt
            .get("logs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// `eth_getBlockReceipts`: the transaction receipts, then the synthetic
    /// receipt when it carries logs.
    pub fn block_receipts(&self) -> Value {
        let mut all = self.receipts.clone();
        if !self.synthetic_logs().is_empty() {
            all.push(self.block_receipt.clone());
        }
        Value::Array(all)
    }

    /// Every log of the block, in emission order.
    pub fn logs(&self) -> Vec<Value> {
        let mut out: Vec<Value> = self
            .receipts
            .iter()
            .filter_map(|r| r.get("logs").and_then(Value::as_array))
            .flatten()
            .cloned()
            .collect();
        out.extend(self.synthetic_logs().iter().cloned());
        out
    }

    /// Apply `f` to transaction `index` both where it is served alone and
    /// where it is embedded in the block.
    pub fn edit_tx(&mut self, index: usize, f: impl Fn(&mut serde_json::Map<String, Value>)) {
        if let Some(Value::Object(tx)) = self.txs.get_mut(index) {
            f(tx);
        }
        if let Some(Value::Object(tx)) = self
            .block
            .get_mut("transactions")
            .and_then(Value::as_array_mut)
            .and_then(|txs| txs.get_mut(index))
        {
            f(tx);
        }
    }

    /// Apply `f` to receipt `index` both where it is served alone and where
    /// `eth_getBlockReceipts` includes it.
    pub fn edit_receipt(&mut self, index: usize, f: impl Fn(&mut serde_json::Map<String, Value>)) {
        if let Some(Value::Object(r)) = self.receipts.get_mut(index) {
            f(r);
        }
    }
}

/// One node's view of the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    pub chain_id: u64,
    pub head: UnitKey,
    pub blocks: BTreeMap<UnitKey, BlockData>,
}

impl NodeData {
    pub fn block_mut(&mut self, unit: UnitKey) -> &mut BlockData {
        self.blocks
            .get_mut(&unit)
            .unwrap_or_else(|| panic!("fixture has no block {unit}"))
    }

    /// Block number owning a block or transaction hash.
    pub fn unit_of_hash(&self, hash: &str) -> Option<UnitKey> {
        let hash = hash.to_ascii_lowercase();
        self.blocks.iter().find_map(|(unit, data)| {
            let owns_block = data.hash() == Some(hash.as_str());
            let owns_tx = data
                .txs
                .iter()
                .any(|tx| tx.get("hash").and_then(Value::as_str) == Some(hash.as_str()));
            (owns_block || owns_tx).then_some(*unit)
        })
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFixture {
    pub chain_id: u64,
    /// First post-migration block. Blocks below it get the legacy header layout.
    pub boundary: UnitKey,
    pub txs_per_block: usize,
    pub logs_per_tx: usize,
    /// Blocks whose number is a multiple of this carry logs on their
    /// synthetic block receipt. `0` disables synthetic logs.
    pub synthetic_logs_every: u64,
    /// Reported head is the last built block plus this.
    pub head_lead: u64,
}

impl ChainFixture {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            boundary: 0,
            txs_per_block: 2,
            logs_per_tx: 1,
            synthetic_logs_every: 2,
            head_lead: 128,
        }
    }

    pub fn with_boundary(mut self, boundary: UnitKey) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn with_txs_per_block(mut self, n: usize) -> Self {
        self.txs_per_block = n;
        self
    }

    /// The two nodes' data for `range`.
    pub fn build(&self, range: RangeInclusive<UnitKey>) -> Pair<NodeData> {
        let head = range.end().saturating_add(self.head_lead);
        let mut reference = BTreeMap::new();
        let mut candidate = BTreeMap::new();
        for unit in range {
            let pair = self.block(unit);
            reference.insert(unit, pair.reference);
            candidate.insert(unit, pair.candidate);
        }
        Pair::new(
            NodeData {
                chain_id: self.chain_id,
                head,
                blocks: reference,
            },
            NodeData {
                chain_id: self.chain_id,
                head,
                blocks: candidate,
            },
        )
    }

    /// EIP-155 `v` with recovery id zero.
    fn legacy_v(&self) -> u64 {
        self.chain_id * 2 + 35
    }

    fn reference_extra(&self, unit: UnitKey) -> Vec<u8> {
        let seal = |tag: u8| AggregatedSeal {
            bitmap: BigUint::from(0b1101u32),
            signature: vec![tag; 48],
            round: BigUint::from(unit % 3),
        };
        let extra = IstanbulExtra {
            added_validators: Vec::new(),
            added_validators_public_keys: Vec::new(),
            removed_validators: BigUint::from(0u32),
            seal: vec![0x5e; 65],
            aggregated_seal: seal(0xa1),
            parent_aggregated_seal: seal(0xa2),
        };
        let mut out = vec![0u8; ISTANBUL_EXTRA_VANITY];
        out.extend_from_slice(&extra.encode());
        out
    }

    fn header(&self, unit: UnitKey, extra_data: Vec<u8>, gas_used: u64) -> Header {
        let post = unit >= self.boundary;
        Header {
            parent_hash: word(0x01, unit.saturating_sub(1)),
            uncle_hash: Some(word(0x1d, 0)),
            miner: address(0x0c),
            state_root: word(0x02, unit),
            transactions_root: word(0x03, unit),
            receipts_root: word(0x04, unit),
            logs_bloom: Bytes(vec![0u8; 256]),
            difficulty: post.then(|| Quantity::from_u64(0)),
            number: unit,
            gas_limit: if post { GAS_LIMIT } else { 0 },
            gas_used,
            timestamp: 1_700_000_000 + unit * 5,
            extra_data: Bytes(extra_data),
            mix_hash: Some(B256::zero()),
            nonce: Some(BlockNonce::zero()),
            base_fee_per_gas: post.then(|| Quantity::from_u64(1)),
            ..Header::default()
        }
    }

    fn tx(&self, unit: UnitKey, index: usize, block_hash: &str, role: Role) -> Value {
        let hash = word(0x70, unit * 1_000 + index as u64).to_string();
        let mut tx = json!({
            "hash": hash,
            "nonce": hex_u64(unit * 10 + index as u64),
            "gas": hex_u64(GAS_PER_TX),
            "to": address(0x0d).to_string(),
            "from": address(0x0f).to_string(),
            "value": "0x1",
            "input": "0x",
            "r": hex_u64(0x1000 + index as u64),
            "s": hex_u64(0x2000 + index as u64),
            "blockHash": block_hash,
            "blockNumber": hex_u64(unit),
            "transactionIndex": hex_u64(index as u64),
            "gasPrice": hex_u64(GAS_PRICE),
        });
        let Some(map) = tx.as_object_mut() else {
            return tx;
        };
        let dynamic = index % 2 == 1;
        if dynamic {
            map.insert("type".into(), json!("0x2"));
            map.insert("maxFeePerGas".into(), hex_u64(GAS_PRICE));
            map.insert("maxPriorityFeePerGas".into(), json!("0x1"));
            map.insert("accessList".into(), json!([]));
            map.insert("chainId".into(), hex_u64(self.chain_id));
            map.insert("v".into(), json!("0x1"));
            if role == Role::Candidate {
                map.insert("yParity".into(), json!("0x1"));
            }
        } else {
            map.insert("type".into(), json!("0x0"));
            map.insert("v".into(), hex_u64(self.legacy_v()));
            if role == Role::Reference {
                map.insert("chainId".into(), hex_u64(self.chain_id));
                map.insert("ethCompatible".into(), json!(true));
                map.insert("gatewayFee".into(), json!("0x0"));
            }
        }
        tx
    }

    fn log(&self, unit: UnitKey, block_hash: &str, tx_hash: &str, tx_index: u64, log_index: u64) -> Value {
        json!({
            "address": address(0x1a).to_string(),
            "topics": [word(0x7e, log_index).to_string()],
            "data": encode_prefixed(&log_index.to_be_bytes()),
            "blockNumber": hex_u64(unit),
            "transactionHash": tx_hash,
            "transactionIndex": hex_u64(tx_index),
            "blockHash": block_hash,
            "logIndex": hex_u64(log_index),
            "removed": false,
        })
    }

    fn block(&self, unit: UnitKey) -> Pair<BlockData> {
        let n = self.txs_per_block;
        let gas_used = GAS_PER_TX * n as u64;
        let reference_extra = self.reference_extra(unit);
        let candidate_extra = match strip_aggregated_seal(&reference_extra) {
            Ok(extra) => extra,
            Err(e) => panic!("fixture extra data must decode: {e}"),
        };
        let header = self.header(unit, candidate_extra, gas_used);
        let block_hash = header.hash().to_string();

        // Receipts and logs are identical on both nodes.
        let mut log_index = 0;
        let mut receipts = Vec::with_capacity(n);
        for i in 0..n {
            let tx_hash = word(0x70, unit * 1_000 + i as u64).to_string();
            let logs: Vec<Value> = (0..self.logs_per_tx)
                .map(|_| {
                    let l = self.log(unit, &block_hash, &tx_hash, i as u64, log_index);
                    log_index += 1;
                    l
                })
                .collect();
            receipts.push(json!({
                "type": if i % 2 == 1 { "0x2" } else { "0x0" },
                "status": "0x1",
                "cumulativeGasUsed": hex_u64(GAS_PER_TX * (i as u64 + 1)),
                "logsBloom": zero_bloom(),
                "logs": logs,
                "transactionHash": tx_hash,
                "contractAddress": null,
                "gasUsed": hex_u64(GAS_PER_TX),
                "effectiveGasPrice": hex_u64(GAS_PRICE),
                "blockHash": block_hash,
                "blockNumber": hex_u64(unit),
                "transactionIndex": hex_u64(i as u64),
                "from": address(0x0f).to_string(),
                "to": address(0x0d).to_string(),
            }));
        }
        let synthetic_logs: Vec<Value> = if self.synthetic_logs_every != 0 && unit % self.synthetic_logs_every == 0 {
            vec![self.log(unit, &block_hash, &block_hash, n as u64, log_index)]
        } else {
            Vec::new()
        };
        let block_receipt = json!({
            "type": "0x0",
            "status": "0x1",
            "cumulativeGasUsed": hex_u64(gas_used),
            "logsBloom": zero_bloom(),
            "logs": synthetic_logs,
            "transactionHash": block_hash,
            "contractAddress": null,
            "gasUsed": "0x0",
            "blockHash": block_hash,
            "blockNumber": hex_u64(unit),
            "transactionIndex": hex_u64(n as u64),
        });

        Pair::new((), ()).map(|role, ()| {
            let txs: Vec<Value> = (0..n).map(|i| self.tx(unit, i, &block_hash, role)).collect();
            let block = self.render_block(unit, &header, &block_hash, &reference_extra, &txs, role);
            BlockData {
                block,
                txs,
                receipts: receipts.clone(),
                block_receipt: block_receipt.clone(),
            }
        })
    }

    fn render_block(
        &self,
        unit: UnitKey,
        header: &Header,
        block_hash: &str,
        reference_extra: &[u8],
        txs: &[Value],
        role: Role,
    ) -> Value {
        let mut block = match serde_json::to_value(header) {
            Ok(v) => v,
            Err(e) => panic!("fixture header must serialize: {e}"),
        };
        let Some(map) = block.as_object_mut() else {
            return block;
        };
        map.insert("hash".into(), json!(block_hash));
        map.insert("transactions".into(), Value::Array(txs.to_vec()));
        map.insert("uncles".into(), json!([]));
        let pre_boundary = unit < self.boundary;

        match role {
            Role::Reference => {
                map.insert("size".into(), hex_u64(0x200 + unit % 7));
                map.insert("extraData".into(), json!(encode_prefixed(reference_extra)));
                map.insert(
                    "randomness".into(),
                    json!({"revealed": word(0x0a, unit).to_string(), "committed": word(0x0b, unit).to_string()}),
                );
                map.insert("epochSnarkData".into(), Value::Null);
                if pre_boundary {
                    for key in ["uncles", "sha3Uncles", "mixHash", "nonce"] {
                        map.remove(key);
                    }
                    map.insert("gasLimit".into(), hex_u64(LEGACY_GAS_LIMIT));
                }
            }
            Role::Candidate => {
                map.insert("size".into(), hex_u64(0x180 + unit % 5));
            }
        }
        block
    }
}
