//! Unit Fetcher: every facet of one block, from both nodes.
//!
//! The candidate's typed block by number is fetched first because its
//! transaction list decides which per-transaction facets exist. Everything
//! else runs under a bounded sub-fetch pool. The whole unit (discovery
//! included) shares one deadline, and the first failing facet fails the unit:
//! the remaining facets are dropped mid-flight and no partial observation is
//! produced.

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use xck_schemas::{Block, Pair, Receipt, Role, Transaction, UnitKey, B256};
use xck_source::{block_number_param, hash_param, methods, Source};

use crate::{FetchError, FetchLimits};

/// Everything retrieved for one block.
///
/// Per-transaction vectors are indexed like `candidate_by_number.transactions`
/// and always have its length. Window-level receipt lists come from their own
/// call and may disagree; verification checks that.
#[derive(Debug)]
pub struct Observation {
    pub unit: UnitKey,
    pub candidate_by_number: Block,
    pub candidate_by_hash: Block,
    pub raw_by_number: Pair<Value>,
    pub raw_by_hash: Pair<Value>,
    pub txs: Pair<Vec<Transaction>>,
    pub raw_txs: Pair<Vec<Value>>,
    pub receipts: Pair<Vec<Receipt>>,
    pub raw_receipts: Pair<Vec<Value>>,
    pub block_receipts: Pair<Vec<Receipt>>,
    /// `eth_getBlockReceipts` verbatim (normally an array).
    pub raw_block_receipts: Pair<Value>,
    /// `eth_getBlockReceipt` verbatim (an object or `null`).
    pub raw_block_receipt: Pair<Value>,
}

impl Observation {
    pub fn tx_count(&self) -> usize {
        self.candidate_by_number.transactions.len()
    }
}

enum Facet {
    CandidateByHash(Block),
    RawByNumber(Role, Value),
    RawByHash(Role, Value),
    RawBlockReceipt(Role, Value),
    BlockReceipts(Role, Vec<Receipt>),
    RawBlockReceipts(Role, Value),
    Tx(Role, usize, Transaction),
    RawTx(Role, usize, Value),
    Receipt(Role, usize, Receipt),
    RawReceipt(Role, usize, Value),
}

type FacetFuture = BoxFuture<'static, Result<Facet, FetchError>>;

fn raw_call(
    source: &Source,
    method: &'static str,
    params: Vec<Value>,
    wrap: impl FnOnce(Value) -> Facet + Send + 'static,
) -> FacetFuture {
    let raw = source.raw.clone();
    let role = source.role;
    async move {
        raw.call(method, params)
            .await
            .map(wrap)
            .map_err(FetchError::annotate(role, method))
    }
    .boxed()
}

fn plan(sources: &Pair<Source>, unit: UnitKey, hash: B256, tx_hashes: &[B256]) -> Vec<FacetFuture> {
    let mut tasks: Vec<FacetFuture> = Vec::with_capacity(9 + 8 * tx_hashes.len());

    let typed = sources.candidate.typed.clone();
    tasks.push(
        async move {
            typed
                .block_by_hash(hash)
                .await
                .map(Facet::CandidateByHash)
                .map_err(FetchError::annotate(Role::Candidate, "typed block by hash"))
        }
        .boxed(),
    );

    for role in Role::BOTH {
        let source = sources.get(role);
        tasks.push(raw_call(
            source,
            methods::BLOCK_BY_NUMBER,
            vec![block_number_param(unit), Value::Bool(true)],
            move |v| Facet::RawByNumber(role, v),
        ));
        tasks.push(raw_call(
            source,
            methods::BLOCK_BY_HASH,
            vec![hash_param(&hash), Value::Bool(true)],
            move |v| Facet::RawByHash(role, v),
        ));
        tasks.push(raw_call(
            source,
            methods::BLOCK_RECEIPT,
            vec![hash_param(&hash)],
            move |v| Facet::RawBlockReceipt(role, v),
        ));
        tasks.push(raw_call(
            source,
            methods::BLOCK_RECEIPTS,
            vec![hash_param(&hash)],
            move |v| Facet::RawBlockReceipts(role, v),
        ));

        let typed = source.typed.clone();
        tasks.push(
            async move {
                typed
                    .block_receipts(hash)
                    .await
                    .map(|r| Facet::BlockReceipts(role, r))
                    .map_err(FetchError::annotate(role, "typed block receipts"))
            }
            .boxed(),
        );

        for (i, tx_hash) in tx_hashes.iter().copied().enumerate() {
            let typed = source.typed.clone();
            tasks.push(
                async move {
                    typed
                        .transaction_by_hash(tx_hash)
                        .await
                        .map(|t| Facet::Tx(role, i, t))
                        .map_err(FetchError::annotate(role, format!("typed transaction {tx_hash}")))
                }
                .boxed(),
            );
            let typed = source.typed.clone();
            tasks.push(
                async move {
                    typed
                        .transaction_receipt(tx_hash)
                        .await
                        .map(|r| Facet::Receipt(role, i, r))
                        .map_err(FetchError::annotate(role, format!("typed receipt {tx_hash}")))
                }
                .boxed(),
            );
            tasks.push(raw_call(
                source,
                methods::TRANSACTION_BY_HASH,
                vec![hash_param(&tx_hash)],
                move |v| Facet::RawTx(role, i, v),
            ));
            tasks.push(raw_call(
                source,
                methods::TRANSACTION_RECEIPT,
                vec![hash_param(&tx_hash)],
                move |v| Facet::RawReceipt(role, i, v),
            ));
        }
    }
    tasks
}

/// Per-index slots filled as facets complete.
struct Slots<T> {
    reference: Vec<Option<T>>,
    candidate: Vec<Option<T>>,
}

impl<T> Slots<T> {
    fn new(len: usize) -> Self {
        Self {
            reference: (0..len).map(|_| None).collect(),
            candidate: (0..len).map(|_| None).collect(),
        }
    }

    fn put(&mut self, role: Role, index: usize, value: T) {
        let slots = match role {
            Role::Reference => &mut self.reference,
            Role::Candidate => &mut self.candidate,
        };
        if let Some(slot) = slots.get_mut(index) {
            *slot = Some(value);
        }
    }

    fn into_pair(self) -> Option<Pair<Vec<T>>> {
        let reference = self.reference.into_iter().collect::<Option<Vec<T>>>()?;
        let candidate = self.candidate.into_iter().collect::<Option<Vec<T>>>()?;
        Some(Pair::new(reference, candidate))
    }
}

#[derive(Default)]
struct Partial {
    candidate_by_hash: Option<Block>,
    raw_by_number: Pair<Option<Value>>,
    raw_by_hash: Pair<Option<Value>>,
    raw_block_receipt: Pair<Option<Value>>,
    block_receipts: Pair<Option<Vec<Receipt>>>,
    raw_block_receipts: Pair<Option<Value>>,
}

fn both<T>(p: Pair<Option<T>>) -> Option<Pair<T>> {
    Some(Pair::new(p.reference?, p.candidate?))
}

async fn collect(sources: &Pair<Source>, unit: UnitKey, sub_fetches: usize) -> Result<Observation, FetchError> {
    let candidate_by_number = sources
        .candidate
        .typed
        .block_by_number(unit)
        .await
        .map_err(FetchError::annotate(Role::Candidate, "typed block by number"))?;
    let hash = candidate_by_number.hash();
    let tx_hashes: Vec<B256> = candidate_by_number.transactions.iter().map(|t| t.hash).collect();
    let n = tx_hashes.len();

    let mut partial = Partial::default();
    let mut txs = Slots::new(n);
    let mut raw_txs = Slots::new(n);
    let mut receipts = Slots::new(n);
    let mut raw_receipts = Slots::new(n);

    let mut pending = stream::iter(plan(sources, unit, hash, &tx_hashes)).buffer_unordered(sub_fetches.max(1));
    while let Some(done) = pending.next().await {
        match done? {
            Facet::CandidateByHash(b) => partial.candidate_by_hash = Some(b),
            Facet::RawByNumber(role, v) => *partial.raw_by_number.get_mut(role) = Some(v),
            Facet::RawByHash(role, v) => *partial.raw_by_hash.get_mut(role) = Some(v),
            Facet::RawBlockReceipt(role, v) => *partial.raw_block_receipt.get_mut(role) = Some(v),
            Facet::BlockReceipts(role, r) => *partial.block_receipts.get_mut(role) = Some(r),
            Facet::RawBlockReceipts(role, v) => *partial.raw_block_receipts.get_mut(role) = Some(v),
            Facet::Tx(role, i, t) => txs.put(role, i, t),
            Facet::RawTx(role, i, v) => raw_txs.put(role, i, v),
            Facet::Receipt(role, i, r) => receipts.put(role, i, r),
            Facet::RawReceipt(role, i, v) => raw_receipts.put(role, i, v),
        }
    }

    // Every planned facet either completed or returned early above.
    let incomplete = || FetchError::Join(format!("block {unit}: facet set incomplete"));
    Ok(Observation {
        unit,
        candidate_by_number,
        candidate_by_hash: partial.candidate_by_hash.ok_or_else(incomplete)?,
        raw_by_number: both(partial.raw_by_number).ok_or_else(incomplete)?,
        raw_by_hash: both(partial.raw_by_hash).ok_or_else(incomplete)?,
        txs: txs.into_pair().ok_or_else(incomplete)?,
        raw_txs: raw_txs.into_pair().ok_or_else(incomplete)?,
        receipts: receipts.into_pair().ok_or_else(incomplete)?,
        raw_receipts: raw_receipts.into_pair().ok_or_else(incomplete)?,
        block_receipts: both(partial.block_receipts).ok_or_else(incomplete)?,
        raw_block_receipts: both(partial.raw_block_receipts).ok_or_else(incomplete)?,
        raw_block_receipt: both(partial.raw_block_receipt).ok_or_else(incomplete)?,
    })
}

/// Fetch every facet of `unit` from both sources.
///
/// Fails on the first facet error, on the unit deadline, or as soon as
/// `cancel` fires.
pub async fn fetch_unit(
    sources: &Pair<Source>,
    unit: UnitKey,
    limits: &FetchLimits,
    cancel: &CancellationToken,
) -> Result<Observation, FetchError> {
    let work = tokio::time::timeout(limits.unit_timeout, collect(sources, unit, limits.sub_fetches));
    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        res = work => match res {
            Ok(observation) => {
                let observation = observation?;
                debug!(unit, txs = observation.tx_count(), "unit fetched");
                Ok(observation)
            }
            Err(_) => Err(FetchError::UnitTimeout {
                unit,
                after: limits.unit_timeout,
            }),
        },
    }
}
