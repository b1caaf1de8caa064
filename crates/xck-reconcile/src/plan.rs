//! Run preflight: agree on the chain and pin down the range before any block
//! is fetched.

use std::collections::BTreeMap;

use xck_schemas::{Pair, Role, UnitKey};
use xck_source::{Source, SourceError};

/// Blocks kept clear of the lower of the two heads when no end is given.
pub const HEAD_MARGIN: u64 = 128;

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("{role} preflight query failed: {source}")]
    Source {
        role: Role,
        #[source]
        source: SourceError,
    },
    #[error("chain id mismatch: reference reports {reference}, candidate reports {candidate}")]
    ChainIdMismatch { reference: u64, candidate: u64 },
    #[error("no migration boundary configured for chain {chain_id} (known: {known:?})")]
    UnknownChain { chain_id: u64, known: Vec<u64> },
    #[error("lower node head {head} leaves no block at or after {start} outside the {margin}-block margin")]
    HeadTooLow { head: u64, start: UnitKey, margin: u64 },
    #[error("empty range: start {start} is after end {end}")]
    EmptyRange { start: UnitKey, end: UnitKey },
}

/// What a run will check, resolved against the live nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub chain_id: u64,
    /// First post-migration block of the chain.
    pub boundary: UnitKey,
    pub start: UnitKey,
    /// Inclusive.
    pub end: UnitKey,
}

fn annotate(role: Role) -> impl FnOnce(SourceError) -> PreflightError {
    move |source| PreflightError::Source { role, source }
}

/// Resolve the run range. Both nodes must serve the same chain, that chain
/// must have a known boundary, and an absent `end` becomes
/// `min(heads) - HEAD_MARGIN`.
pub async fn preflight(
    sources: &Pair<Source>,
    boundaries: &BTreeMap<u64, UnitKey>,
    start: UnitKey,
    end: Option<UnitKey>,
) -> Result<RunPlan, PreflightError> {
    let (reference, candidate) = tokio::try_join!(
        async {
            sources
                .reference
                .typed
                .chain_id()
                .await
                .map_err(annotate(Role::Reference))
        },
        async {
            sources
                .candidate
                .typed
                .chain_id()
                .await
                .map_err(annotate(Role::Candidate))
        },
    )?;
    if reference != candidate {
        return Err(PreflightError::ChainIdMismatch { reference, candidate });
    }
    let chain_id = reference;
    let boundary = *boundaries
        .get(&chain_id)
        .ok_or_else(|| PreflightError::UnknownChain {
            chain_id,
            known: boundaries.keys().copied().collect(),
        })?;

    let end = match end {
        Some(end) => end,
        None => {
            let (ref_head, cand_head) = tokio::try_join!(
                async {
                    sources
                        .reference
                        .typed
                        .block_number()
                        .await
                        .map_err(annotate(Role::Reference))
                },
                async {
                    sources
                        .candidate
                        .typed
                        .block_number()
                        .await
                        .map_err(annotate(Role::Candidate))
                },
            )?;
            let head = ref_head.min(cand_head);
            match head.checked_sub(HEAD_MARGIN) {
                Some(end) if end >= start => end,
                _ => {
                    return Err(PreflightError::HeadTooLow {
                        head,
                        start,
                        margin: HEAD_MARGIN,
                    })
                }
            }
        }
    };
    if end < start {
        return Err(PreflightError::EmptyRange { start, end });
    }
    Ok(RunPlan {
        chain_id,
        boundary,
        start,
        end,
    })
}
