//! JSON-RPC 2.0 over HTTP.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Client, Url};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{RawSource, SourceError};

const JSONRPC_VERSION: &str = "2.0";

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a [Value],
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    /// `Some(Value::Null)` for an explicit `"result": null`, `None` when the
    /// key is missing.
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Untyped JSON-RPC client for one node endpoint.
#[derive(Debug)]
pub struct RpcClient {
    http: Client,
    url: Url,
    next_id: AtomicU64,
}

impl RpcClient {
    /// `timeout` bounds each request; the unit and window deadlines sit on top.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SourceError> {
        let url = Url::parse(endpoint.trim())
            .map_err(|e| SourceError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::InvalidEndpoint(format!(
                "{endpoint}: unsupported scheme '{}'",
                url.scheme()
            )));
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.url
    }
}

#[async_trait::async_trait]
impl RawSource for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params: &params,
        };
        debug!(method, id, "rpc call");

        let response = self.http.post(self.url.clone()).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status()));
        }
        let body: RpcResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(SourceError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        body.result.ok_or(SourceError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoints() {
        let timeout = Duration::from_secs(1);
        assert!(matches!(
            RpcClient::new("ws://localhost:8546", timeout),
            Err(SourceError::InvalidEndpoint(_))
        ));
        assert!(RpcClient::new("not a url", timeout).is_err());
        assert!(RpcClient::new("http://127.0.0.1:8545", timeout).is_ok());
    }

    #[test]
    fn explicit_null_result_is_kept() {
        let body: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert_eq!(body.result, Some(Value::Null));
        let body: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(body.result.is_none());
    }
}
