//! In-memory node serving a [`NodeData`], with injectable faults and latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use xck_schemas::hex::parse_u64_quantity;
use xck_schemas::{Role, UnitKey};
use xck_source::{methods, RawSource, Source, SourceError};

use crate::chain::NodeData;

/// JSON-RPC error code used for injected failures.
pub const INJECTED_ERROR_CODE: i64 = -32000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fault {
    method: Option<String>,
    unit: Option<UnitKey>,
    message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Delay {
    method: Option<String>,
    from: UnitKey,
    to: UnitKey,
    by: Duration,
}

/// A [`RawSource`] answering from fixture data.
///
/// A fault or delay with no method matches every method; one with no unit
/// matches every block. The block a call is about is read from its params
/// (block number, block or transaction hash, or `fromBlock`).
#[derive(Debug)]
pub struct FakeSource {
    node: NodeData,
    faults: Vec<Fault>,
    delays: Vec<Delay>,
    calls: AtomicU64,
}

impl FakeSource {
    pub fn new(node: NodeData) -> Self {
        Self {
            node,
            faults: Vec::new(),
            delays: Vec::new(),
            calls: AtomicU64::new(0),
        }
    }

    /// Answer matching calls with a JSON-RPC error.
    pub fn fail(mut self, method: Option<&str>, unit: Option<UnitKey>, message: impl Into<String>) -> Self {
        self.faults.push(Fault {
            method: method.map(str::to_string),
            unit,
            message: message.into(),
        });
        self
    }

    /// Sleep before answering calls about blocks in `[from, to]`.
    pub fn delay_units(mut self, from: UnitKey, to: UnitKey, by: Duration) -> Self {
        self.delays.push(Delay {
            method: None,
            from,
            to,
            by,
        });
        self
    }

    /// Sleep before answering every call to `method`.
    pub fn delay_method(mut self, method: &str, by: Duration) -> Self {
        self.delays.push(Delay {
            method: Some(method.to_string()),
            from: 0,
            to: UnitKey::MAX,
            by,
        });
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn into_source(self, role: Role) -> Source {
        let raw: Arc<dyn RawSource> = Arc::new(self);
        Source::from_raw(role, raw)
    }

    fn unit_of(&self, method: &str, params: &[Value]) -> Option<UnitKey> {
        let first = params.first()?;
        match method {
            methods::BLOCK_BY_NUMBER => parse_u64_quantity(first.as_str()?).ok(),
            methods::GET_LOGS => parse_u64_quantity(first.get("fromBlock")?.as_str()?).ok(),
            _ => self.node.unit_of_hash(first.as_str()?),
        }
    }

    fn answer(&self, method: &str, unit: Option<UnitKey>) -> Result<Value, SourceError> {
        let block = unit.and_then(|u| self.node.blocks.get(&u));
        let null = || Ok(Value::Null);
        match method {
            methods::CHAIN_ID => Ok(Value::String(format!("{:#x}", self.node.chain_id))),
            methods::BLOCK_NUMBER => Ok(Value::String(format!("{:#x}", self.node.head))),
            methods::BLOCK_BY_NUMBER | methods::BLOCK_BY_HASH => block.map_or_else(null, |b| Ok(b.block.clone())),
            methods::BLOCK_RECEIPT => block.map_or_else(null, |b| Ok(b.block_receipt.clone())),
            methods::BLOCK_RECEIPTS => block.map_or_else(null, |b| Ok(b.block_receipts())),
            other => Err(SourceError::Rpc {
                code: -32601,
                message: format!("the method {other} does not exist/is not available"),
            }),
        }
    }

    fn answer_tx(&self, method: &str, unit: UnitKey, hash: &str) -> Value {
        let Some(block) = self.node.blocks.get(&unit) else {
            return Value::Null;
        };
        let index = block
            .txs
            .iter()
            .position(|tx| tx.get("hash").and_then(Value::as_str) == Some(hash));
        let served = match method {
            methods::TRANSACTION_BY_HASH => &block.txs,
            _ => &block.receipts,
        };
        index.and_then(|i| served.get(i)).cloned().unwrap_or(Value::Null)
    }

    fn logs(&self, params: &[Value]) -> Value {
        let bound = |key: &str| {
            params
                .first()
                .and_then(|f| f.get(key))
                .and_then(Value::as_str)
                .and_then(|s| parse_u64_quantity(s).ok())
        };
        let (Some(from), Some(to)) = (bound("fromBlock"), bound("toBlock")) else {
            return Value::Array(Vec::new());
        };
        Value::Array(
            self.node
                .blocks
                .range(from..=to)
                .flat_map(|(_, b)| b.logs())
                .collect(),
        )
    }
}

#[async_trait::async_trait]
impl RawSource for FakeSource {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let unit = self.unit_of(method, &params);

        let matches_method = |m: &Option<String>| m.as_deref().map_or(true, |m| m == method);
        let delay: Duration = self
            .delays
            .iter()
            .filter(|d| matches_method(&d.method))
            .filter(|d| d.method.is_some() || unit.is_some_and(|u| (d.from..=d.to).contains(&u)))
            .map(|d| d.by)
            .sum();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let fault = self
            .faults
            .iter()
            .find(|f| matches_method(&f.method) && f.unit.map_or(true, |u| unit == Some(u)));
        if let Some(fault) = fault {
            return Err(SourceError::Rpc {
                code: INJECTED_ERROR_CODE,
                message: fault.message.clone(),
            });
        }

        match method {
            methods::GET_LOGS => Ok(self.logs(&params)),
            methods::TRANSACTION_BY_HASH | methods::TRANSACTION_RECEIPT => {
                let hash = params.first().and_then(Value::as_str).unwrap_or_default();
                Ok(unit.map_or(Value::Null, |u| self.answer_tx(method, u, &hash.to_ascii_lowercase())))
            }
            _ => self.answer(method, unit),
        }
    }
}

/// Both fixture nodes as sources, untouched.
pub fn sources(nodes: crate::Pair<NodeData>) -> crate::Pair<Source> {
    nodes.map(|role, node| FakeSource::new(node).into_source(role))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainFixture;
    use serde_json::json;

    #[tokio::test]
    async fn serves_fixture_by_number_hash_and_range() {
        let nodes = ChainFixture::new(42220).build(5..=6);
        let block_hash = nodes.reference.blocks[&6].hash().unwrap().to_string();
        let tx_hash = nodes.reference.blocks[&6].txs[0]["hash"].clone();
        let fake = FakeSource::new(nodes.reference);

        let by_number = fake.call(methods::BLOCK_BY_NUMBER, vec![json!("0x6"), json!(true)]).await.unwrap();
        let by_hash = fake.call(methods::BLOCK_BY_HASH, vec![json!(block_hash), json!(true)]).await.unwrap();
        assert_eq!(by_number, by_hash);

        let tx = fake.call(methods::TRANSACTION_BY_HASH, vec![tx_hash.clone()]).await.unwrap();
        assert_eq!(tx["hash"], tx_hash);
        let receipt = fake.call(methods::TRANSACTION_RECEIPT, vec![tx_hash]).await.unwrap();
        assert_eq!(receipt["status"], "0x1");

        let logs = fake
            .call(methods::GET_LOGS, vec![json!({"fromBlock": "0x5", "toBlock": "0x6"})])
            .await
            .unwrap();
        assert_eq!(logs.as_array().unwrap().len(), 2 + 3);

        let missing = fake.call(methods::BLOCK_BY_NUMBER, vec![json!("0x7"), json!(true)]).await.unwrap();
        assert_eq!(missing, Value::Null);
        assert_eq!(fake.calls(), 6);
    }

    #[tokio::test]
    async fn faults_match_on_method_and_block() {
        let nodes = ChainFixture::new(42220).build(1..=2);
        let fake = FakeSource::new(nodes.candidate).fail(Some(methods::BLOCK_BY_NUMBER), Some(2), "boom");

        assert!(fake.call(methods::BLOCK_BY_NUMBER, vec![json!("0x1"), json!(true)]).await.is_ok());
        match fake.call(methods::BLOCK_BY_NUMBER, vec![json!("0x2"), json!(true)]).await {
            Err(SourceError::Rpc { code, message }) => {
                assert_eq!(code, INJECTED_ERROR_CODE);
                assert_eq!(message, "boom");
            }
            other => panic!("expected injected error, got {other:?}"),
        }
        assert!(fake.call(methods::CHAIN_ID, Vec::new()).await.is_ok());
    }
}
