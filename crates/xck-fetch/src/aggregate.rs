//! Aggregate Fetcher: all logs in one window, from both nodes, over both the
//! typed range filter and the raw `eth_getLogs` call.

use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use xck_schemas::{Log, Pair, UnitKey};
use xck_source::{log_filter_param, methods, Source};

use crate::FetchError;

/// The four result sets for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSet {
    pub typed: Pair<Vec<Log>>,
    /// Raw `eth_getLogs` results verbatim (normally arrays).
    pub raw: Pair<Value>,
}

async fn typed_logs(source: &Source, first: UnitKey, last: UnitKey) -> Result<Vec<Log>, FetchError> {
    source
        .typed
        .filter_logs(first, last)
        .await
        .map_err(FetchError::annotate(source.role, "typed logs"))
}

async fn raw_logs(source: &Source, first: UnitKey, last: UnitKey) -> Result<Value, FetchError> {
    source
        .raw
        .call(methods::GET_LOGS, vec![log_filter_param(first, last)])
        .await
        .map_err(FetchError::annotate(source.role, methods::GET_LOGS))
}

/// Fetch the aggregate for blocks `[start, end)`. The four queries run
/// concurrently; the first failure drops the rest.
pub async fn fetch_aggregate(
    sources: &Pair<Source>,
    start: UnitKey,
    end: UnitKey,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<AggregateSet, FetchError> {
    let last = end.saturating_sub(1).max(start);
    let work = async {
        tokio::try_join!(
            typed_logs(&sources.reference, start, last),
            typed_logs(&sources.candidate, start, last),
            raw_logs(&sources.reference, start, last),
            raw_logs(&sources.candidate, start, last),
        )
    };
    let (typed_ref, typed_cand, raw_ref, raw_cand) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        res = tokio::time::timeout(timeout, work) => match res {
            Ok(sets) => sets?,
            Err(_) => return Err(FetchError::WindowTimeout { start, end, after: timeout }),
        },
    };
    debug!(
        start,
        end,
        logs = typed_ref.len(),
        "window aggregate fetched"
    );
    Ok(AggregateSet {
        typed: Pair::new(typed_ref, typed_cand),
        raw: Pair::new(raw_ref, raw_cand),
    })
}

/// Wait for a spawned aggregate.
pub async fn join_aggregate(
    handle: JoinHandle<Result<AggregateSet, FetchError>>,
) -> Result<AggregateSet, FetchError> {
    match handle.await {
        Ok(res) => res,
        Err(e) if e.is_cancelled() => Err(FetchError::Cancelled),
        Err(e) => Err(FetchError::Join(e.to_string())),
    }
}
