//! Block headers and blocks.
//!
//! # Identity hash
//!
//! A block's identity hash is `keccak256(rlp(header))`. Two header layouts
//! exist on the migrated chain:
//!
//! - **Pre-boundary** (`gasLimit == 0`): the legacy 10-field layout with no
//!   uncle hash, difficulty, gas limit, mix digest or nonce.
//! - **Post-boundary**: the standard 15-field layout, followed by the optional
//!   fork fields. An optional field is written when it, or any later optional
//!   field, is present; absent ones in that prefix are written as empty strings.
//!
//! The hash is derived lazily and cached on the [`Block`], so a freshly decoded
//! block and one whose hash has been read differ in internal state. Comparators
//! must force the hash on both sides before comparing.

use std::sync::OnceLock;

use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::hex::{opt_u64_quantity, u64_quantity};
use crate::{Address, BlockNonce, Bytes, Quantity, Transaction, B256};

/// keccak256 of `data`.
pub fn keccak256(data: &[u8]) -> B256 {
    let digest = Keccak256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_slice());
    B256(out)
}

fn append_bytes(s: &mut RlpStream, bytes: &[u8]) {
    s.append(&bytes);
}

fn append_quantity(s: &mut RlpStream, q: &Quantity) {
    append_bytes(s, &q.to_be_bytes_trimmed());
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub parent_hash: B256,
    #[serde(rename = "sha3Uncles", default, skip_serializing_if = "Option::is_none")]
    pub uncle_hash: Option<B256>,
    pub miner: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    pub receipts_root: B256,
    pub logs_bloom: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Quantity>,
    #[serde(with = "u64_quantity")]
    pub number: u64,
    /// Zero on pre-boundary headers.
    #[serde(default, with = "u64_quantity")]
    pub gas_limit: u64,
    #[serde(with = "u64_quantity")]
    pub gas_used: u64,
    #[serde(with = "u64_quantity")]
    pub timestamp: u64,
    pub extra_data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mix_hash: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<BlockNonce>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals_root: Option<B256>,
    #[serde(
        default,
        with = "opt_u64_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub blob_gas_used: Option<u64>,
    #[serde(
        default,
        with = "opt_u64_quantity",
        skip_serializing_if = "Option::is_none"
    )]
    pub excess_blob_gas: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_beacon_block_root: Option<B256>,
}

impl Header {
    /// Legacy headers never carried a gas limit; the migrated node reports zero.
    pub fn is_pre_boundary(&self) -> bool {
        self.gas_limit == 0
    }

    /// Canonical RLP encoding in whichever layout applies to this header.
    pub fn rlp_bytes(&self) -> Vec<u8> {
        if self.is_pre_boundary() {
            self.rlp_pre_boundary()
        } else {
            self.rlp_post_boundary()
        }
    }

    /// `keccak256(rlp(header))`.
    pub fn hash(&self) -> B256 {
        keccak256(&self.rlp_bytes())
    }

    fn rlp_pre_boundary(&self) -> Vec<u8> {
        let mut s = RlpStream::new_list(10);
        append_bytes(&mut s, self.parent_hash.as_bytes());
        append_bytes(&mut s, self.miner.as_bytes());
        append_bytes(&mut s, self.state_root.as_bytes());
        append_bytes(&mut s, self.transactions_root.as_bytes());
        append_bytes(&mut s, self.receipts_root.as_bytes());
        append_bytes(&mut s, self.logs_bloom.as_slice());
        s.append(&self.number);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        append_bytes(&mut s, self.extra_data.as_slice());
        s.out().to_vec()
    }

    fn rlp_post_boundary(&self) -> Vec<u8> {
        let optional_present = [
            self.base_fee_per_gas.is_some(),
            self.withdrawals_root.is_some(),
            self.blob_gas_used.is_some(),
            self.excess_blob_gas.is_some(),
            self.parent_beacon_block_root.is_some(),
        ];
        let optional_len = optional_present
            .iter()
            .rposition(|present| *present)
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut s = RlpStream::new_list(15 + optional_len);
        append_bytes(&mut s, self.parent_hash.as_bytes());
        append_bytes(&mut s, self.uncle_hash.unwrap_or_default().as_bytes());
        append_bytes(&mut s, self.miner.as_bytes());
        append_bytes(&mut s, self.state_root.as_bytes());
        append_bytes(&mut s, self.transactions_root.as_bytes());
        append_bytes(&mut s, self.receipts_root.as_bytes());
        append_bytes(&mut s, self.logs_bloom.as_slice());
        append_quantity(&mut s, &self.difficulty.clone().unwrap_or_default());
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.timestamp);
        append_bytes(&mut s, self.extra_data.as_slice());
        append_bytes(&mut s, self.mix_hash.unwrap_or_default().as_bytes());
        append_bytes(&mut s, self.nonce.unwrap_or_default().as_bytes());

        for idx in 0..optional_len {
            match idx {
                0 => match &self.base_fee_per_gas {
                    Some(q) => append_quantity(&mut s, q),
                    None => append_bytes(&mut s, &[]),
                },
                1 => match &self.withdrawals_root {
                    Some(h) => append_bytes(&mut s, h.as_bytes()),
                    None => append_bytes(&mut s, &[]),
                },
                2 => match self.blob_gas_used {
                    Some(v) => {
                        s.append(&v);
                    }
                    None => append_bytes(&mut s, &[]),
                },
                3 => match self.excess_blob_gas {
                    Some(v) => {
                        s.append(&v);
                    }
                    None => append_bytes(&mut s, &[]),
                },
                _ => match &self.parent_beacon_block_root {
                    Some(h) => append_bytes(&mut s, h.as_bytes()),
                    None => append_bytes(&mut s, &[]),
                },
            }
        }
        s.out().to_vec()
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A block as decoded by the typed query path (full transactions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(flatten)]
    pub header: Header,
    /// Hash as reported by the node, if any. The derived hash is [`Block::hash`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<B256>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub uncles: Vec<B256>,
    #[serde(skip)]
    sealed: OnceLock<B256>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            hash: None,
            transactions,
            uncles: Vec::new(),
            sealed: OnceLock::new(),
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Derived identity hash. Computed on first call and cached.
    pub fn hash(&self) -> B256 {
        *self.sealed.get_or_init(|| self.header.hash())
    }

    /// `true` once [`Block::hash`] has been called on this instance.
    pub fn is_sealed(&self) -> bool {
        self.sealed.get().is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
