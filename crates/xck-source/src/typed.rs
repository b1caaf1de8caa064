//! Typed queries layered over any [`RawSource`].

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use xck_schemas::hex::{encode_prefixed, parse_u64_quantity};
use xck_schemas::{Block, Log, Receipt, Transaction, UnitKey, B256};

use crate::{methods, RawSource, SourceError, TypedSource};

/// `0x`-prefixed block number as the node expects it in params.
pub fn block_number_param(n: UnitKey) -> Value {
    Value::String(format!("{n:#x}"))
}

pub fn hash_param(h: &B256) -> Value {
    Value::String(encode_prefixed(h.as_bytes()))
}

/// Filter object for `eth_getLogs` over `[from, to]`, both inclusive.
pub fn log_filter_param(from: UnitKey, to: UnitKey) -> Value {
    json!({ "fromBlock": format!("{from:#x}"), "toBlock": format!("{to:#x}") })
}

/// Decodes raw responses into typed records.
///
/// A `null` result is [`SourceError::NotFound`]. Transactions are stamped
/// with the local time they were decoded.
pub struct DecodingClient<R: ?Sized> {
    raw: Arc<R>,
}

impl<R: RawSource + ?Sized> DecodingClient<R> {
    pub fn new(raw: Arc<R>) -> Self {
        Self { raw }
    }

    async fn fetch<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, SourceError> {
        let value = self.raw.call(method, params).await?;
        if value.is_null() {
            return Err(SourceError::NotFound {
                method: method.to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| SourceError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    async fn fetch_quantity(&self, method: &str) -> Result<u64, SourceError> {
        let value: String = self.fetch(method, Vec::new()).await?;
        parse_u64_quantity(&value).map_err(|e| SourceError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    fn stamp(mut block: Block) -> Block {
        let now = Utc::now();
        for tx in &mut block.transactions {
            tx.stamp_seen_at(now);
        }
        block
    }
}

#[async_trait::async_trait]
impl<R: RawSource + ?Sized> TypedSource for DecodingClient<R> {
    async fn chain_id(&self) -> Result<u64, SourceError> {
        self.fetch_quantity(methods::CHAIN_ID).await
    }

    async fn block_number(&self) -> Result<UnitKey, SourceError> {
        self.fetch_quantity(methods::BLOCK_NUMBER).await
    }

    async fn block_by_number(&self, number: UnitKey) -> Result<Block, SourceError> {
        let params = vec![block_number_param(number), Value::Bool(true)];
        self.fetch(methods::BLOCK_BY_NUMBER, params).await.map(Self::stamp)
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Block, SourceError> {
        let params = vec![hash_param(&hash), Value::Bool(true)];
        self.fetch(methods::BLOCK_BY_HASH, params).await.map(Self::stamp)
    }

    async fn transaction_by_hash(&self, hash: B256) -> Result<Transaction, SourceError> {
        let mut tx: Transaction = self
            .fetch(methods::TRANSACTION_BY_HASH, vec![hash_param(&hash)])
            .await?;
        tx.stamp_seen_at(Utc::now());
        Ok(tx)
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Receipt, SourceError> {
        self.fetch(methods::TRANSACTION_RECEIPT, vec![hash_param(&hash)])
            .await
    }

    async fn block_receipts(&self, hash: B256) -> Result<Vec<Receipt>, SourceError> {
        self.fetch(methods::BLOCK_RECEIPTS, vec![hash_param(&hash)])
            .await
    }

    async fn filter_logs(&self, from: UnitKey, to: UnitKey) -> Result<Vec<Log>, SourceError> {
        self.fetch(methods::GET_LOGS, vec![log_filter_param(from, to)])
            .await
    }
}
