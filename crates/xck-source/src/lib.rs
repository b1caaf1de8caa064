//! xck-source
//!
//! The two query surfaces a node exposes to the cross-checker:
//!
//! - [`RawSource`]: invoke a named JSON-RPC method with positional params and
//!   get the untyped result back
//! - [`TypedSource`]: the standard lookups, decoded into `xck-schemas` records
//!
//! [`RpcClient`] is the HTTP implementation of [`RawSource`];
//! [`DecodingClient`] turns any raw source into a typed one. Sources are
//! read-only: nothing here ever sends a state-changing call.

pub mod error;
pub mod rpc;
pub mod typed;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use xck_schemas::{Block, Log, Receipt, Role, Transaction, UnitKey, B256};

pub use error::SourceError;
pub use rpc::RpcClient;
pub use typed::{block_number_param, hash_param, log_filter_param, DecodingClient};

/// JSON-RPC method names.
pub mod methods {
    pub const CHAIN_ID: &str = "eth_chainId";
    pub const BLOCK_NUMBER: &str = "eth_blockNumber";
    pub const BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
    pub const BLOCK_BY_HASH: &str = "eth_getBlockByHash";
    pub const TRANSACTION_BY_HASH: &str = "eth_getTransactionByHash";
    pub const TRANSACTION_RECEIPT: &str = "eth_getTransactionReceipt";
    pub const BLOCK_RECEIPTS: &str = "eth_getBlockReceipts";
    /// Synthetic receipt for system operations run at the end of a block.
    /// Raw only; no typed accessor exists.
    pub const BLOCK_RECEIPT: &str = "eth_getBlockReceipt";
    pub const GET_LOGS: &str = "eth_getLogs";
}

#[async_trait::async_trait]
pub trait RawSource: Send + Sync {
    /// Returns the `result` member verbatim, including an explicit `null`.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, SourceError>;
}

#[async_trait::async_trait]
pub trait TypedSource: Send + Sync {
    async fn chain_id(&self) -> Result<u64, SourceError>;

    async fn block_number(&self) -> Result<UnitKey, SourceError>;

    async fn block_by_number(&self, number: UnitKey) -> Result<Block, SourceError>;

    async fn block_by_hash(&self, hash: B256) -> Result<Block, SourceError>;

    async fn transaction_by_hash(&self, hash: B256) -> Result<Transaction, SourceError>;

    async fn transaction_receipt(&self, hash: B256) -> Result<Receipt, SourceError>;

    async fn block_receipts(&self, hash: B256) -> Result<Vec<Receipt>, SourceError>;

    /// Logs emitted in blocks `[from, to]`, both inclusive.
    async fn filter_logs(&self, from: UnitKey, to: UnitKey) -> Result<Vec<Log>, SourceError>;
}

/// One node, seen through both query surfaces.
#[derive(Clone)]
pub struct Source {
    pub role: Role,
    pub typed: Arc<dyn TypedSource>,
    pub raw: Arc<dyn RawSource>,
}

impl Source {
    /// Typed queries decoded from the same raw transport.
    pub fn from_raw(role: Role, raw: Arc<dyn RawSource>) -> Self {
        let typed: Arc<dyn TypedSource> = Arc::new(DecodingClient::new(raw.clone()));
        Self { role, typed, raw }
    }

    pub fn http(role: Role, endpoint: &str, request_timeout: Duration) -> Result<Self, SourceError> {
        let raw: Arc<dyn RawSource> = Arc::new(RpcClient::new(endpoint, request_timeout)?);
        Ok(Self::from_raw(role, raw))
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source").field("role", &self.role).finish_non_exhaustive()
    }
}
