use reqwest::StatusCode;

/// Errors a [`RawSource`](crate::RawSource) or [`TypedSource`](crate::TypedSource)
/// may return. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("invalid RPC endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC transport error: HTTP status {0}")]
    HttpStatus(StatusCode),
    #[error("RPC returned an empty response")]
    EmptyResponse,
    #[error("RPC error [{code}]: {message}")]
    Rpc { code: i64, message: String },
    #[error("{method}: could not decode response: {message}")]
    Decode { method: String, message: String },
    #[error("{method}: not found")]
    NotFound { method: String },
}
