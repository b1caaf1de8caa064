//! Reconciler: the run loop.
//!
//! Two halves share one cancellation token:
//!
//! - the dispatcher walks `[start, end]`, launching at most `units` block
//!   fetches at a time, and pushes each finished observation onto a bounded
//!   queue (producers wait when it is full);
//! - the consumer, on the calling task, drains the queue in arrival order,
//!   verifies each block, advances the contiguous cursor, and feeds the
//!   window set, closing each window inline the moment its last block lands.
//!
//! The first failure anywhere is recorded and cancels the token; everything
//! else unwinds at its next await point. The run returns that first failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use xck_compare::{Comparator, Warning};
use xck_fetch::{fetch_aggregate, fetch_unit, FetchError, FetchLimits, Observation};
use xck_schemas::{Pair, UnitKey};
use xck_source::Source;

use crate::cursor::ContiguousCursor;
use crate::error::{FailureCause, ReconcileError};
use crate::verify::verify_unit;
use crate::window::WindowSet;

pub const DEFAULT_WINDOW_SIZE: u64 = 1000;
pub const DEFAULT_UNIT_CONCURRENCY: usize = 5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    pub start: UnitKey,
    /// Inclusive.
    pub end: UnitKey,
    pub window_size: u64,
    /// Blocks fetched concurrently.
    pub units: usize,
    /// Fetched blocks waiting for the consumer.
    pub queue_capacity: usize,
    pub limits: FetchLimits,
    /// Emit a progress line every this many verified blocks.
    pub progress_every: u64,
}

impl ReconcileConfig {
    pub fn new(start: UnitKey, end: UnitKey) -> Self {
        Self {
            start,
            end,
            window_size: DEFAULT_WINDOW_SIZE,
            units: DEFAULT_UNIT_CONCURRENCY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            limits: FetchLimits::default(),
            progress_every: DEFAULT_WINDOW_SIZE,
        }
    }

    pub fn total(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Live counters, readable while the run is in progress.
#[derive(Debug, Default)]
pub struct RunStats {
    in_flight: AtomicU64,
    max_in_flight: AtomicU64,
    max_queued: AtomicU64,
    verified: AtomicU64,
    /// Highest verified block plus one; zero when none.
    highest_verified: AtomicU64,
    windows_closed: AtomicU64,
    warnings: AtomicU64,
}

impl RunStats {
    fn fetch_started(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn fetch_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// `depth` is read off the channel while holding a reserved slot, so it
    /// counts that slot.
    fn queue_depth(&self, depth: usize) {
        self.max_queued.fetch_max(depth as u64, Ordering::SeqCst);
    }

    fn verified_unit(&self, unit: UnitKey) {
        self.verified.fetch_add(1, Ordering::SeqCst);
        self.highest_verified.fetch_max(unit + 1, Ordering::SeqCst);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> u64 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn max_queued(&self) -> u64 {
        self.max_queued.load(Ordering::SeqCst)
    }

    pub fn verified(&self) -> u64 {
        self.verified.load(Ordering::SeqCst)
    }

    pub fn highest_verified(&self) -> Option<UnitKey> {
        self.highest_verified.load(Ordering::SeqCst).checked_sub(1)
    }

    pub fn windows_closed(&self) -> u64 {
        self.windows_closed.load(Ordering::SeqCst)
    }

    pub fn warnings(&self) -> u64 {
        self.warnings.load(Ordering::SeqCst)
    }
}

/// Outcome of a clean run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub start: UnitKey,
    pub end: UnitKey,
    pub verified: u64,
    pub windows_closed: u64,
    pub warnings: Vec<Warning>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// First failure
// ---------------------------------------------------------------------------

struct FirstFailure {
    slot: Mutex<Option<ReconcileError>>,
    cancel: CancellationToken,
}

impl FirstFailure {
    /// Keep `err` if nothing failed before it, then cancel the run.
    fn record(&self, err: ReconcileError) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            if !err.is_cancelled() {
                error!(error = %err, "run aborted");
            }
            *slot = Some(err);
        }
        drop(slot);
        self.cancel.cancel();
    }

    fn take(&self) -> Option<ReconcileError> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    sources: Pair<Source>,
    comparator: Arc<Comparator>,
    config: ReconcileConfig,
    cancel: CancellationToken,
    stats: Arc<RunStats>,
}

impl Reconciler {
    pub fn new(sources: Pair<Source>, comparator: Comparator, config: ReconcileConfig) -> Self {
        Self {
            sources,
            comparator: Arc::new(comparator),
            config,
            cancel: CancellationToken::new(),
            stats: Arc::new(RunStats::default()),
        }
    }

    /// The run's root token. Cancelling it stops the run with a
    /// `Cancelled` failure.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> Arc<RunStats> {
        self.stats.clone()
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Verify every block in the configured range.
    pub async fn run(self) -> Result<RunSummary, ReconcileError> {
        let began = Instant::now();
        let cfg = &self.config;
        let failure = Arc::new(FirstFailure {
            slot: Mutex::new(None),
            cancel: self.cancel.clone(),
        });
        if cfg.total() == 0 {
            return Err(ReconcileError::new(FailureCause::Internal(format!(
                "empty range [{}, {}]",
                cfg.start, cfg.end
            ))));
        }
        info!(
            start = cfg.start,
            end = cfg.end,
            window = cfg.window_size,
            units = cfg.units,
            queue = cfg.queue_capacity,
            "reconciliation started"
        );

        let (tx, mut rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let dispatcher = tokio::spawn(dispatch(
            self.sources.clone(),
            cfg.clone(),
            tx,
            self.stats.clone(),
            failure.clone(),
        ));

        let sources = self.sources.clone();
        let window_timeout = cfg.limits.window_timeout;
        let aggregate_failure = failure.clone();
        let mut windows = WindowSet::new(cfg.window_size, cfg.start, cfg.end, move |index, start, end| {
            let sources = sources.clone();
            let failure = aggregate_failure.clone();
            // A failed aggregate stops the run now, not when its window fills.
            tokio::spawn(async move {
                let cancel = failure.cancel.clone();
                match fetch_aggregate(&sources, start, end, window_timeout, &cancel).await {
                    Err(e) if !e.is_cancelled() => {
                        failure.record(ReconcileError::new(e).at_window(index));
                        Err(FetchError::Cancelled)
                    }
                    res => res,
                }
            })
        });
        let mut cursor = ContiguousCursor::new(cfg.start);
        let mut warnings = Vec::new();

        let consumed = self
            .consume(&mut rx, &mut windows, &mut cursor, &mut warnings, began)
            .await;
        if let Err(err) = consumed {
            failure.record(err.with_contiguous(cursor.verified_through()));
            windows.abort_all();
        }
        drop(rx);

        if let Err(join) = dispatcher.await {
            failure.record(ReconcileError::new(FailureCause::Internal(format!(
                "dispatcher task ended abnormally: {join}"
            ))));
        }

        if let Some(err) = failure.take() {
            return Err(err.with_contiguous(cursor.verified_through()));
        }

        let summary = RunSummary {
            start: cfg.start,
            end: cfg.end,
            verified: self.stats.verified(),
            windows_closed: self.stats.windows_closed(),
            warnings,
            elapsed: began.elapsed(),
        };
        info!(
            verified = summary.verified,
            windows = summary.windows_closed,
            warnings = summary.warnings.len(),
            elapsed = ?summary.elapsed,
            "reconciliation finished"
        );
        Ok(summary)
    }

    async fn consume<L>(
        &self,
        rx: &mut mpsc::Receiver<Observation>,
        windows: &mut WindowSet<L>,
        cursor: &mut ContiguousCursor,
        warnings: &mut Vec<Warning>,
        began: Instant,
    ) -> Result<(), ReconcileError>
    where
        L: FnMut(u64, UnitKey, UnitKey) -> crate::window::AggregateHandle,
    {
        let total = self.config.total();
        let every = self.config.progress_every.max(1);
        let mut consumed = 0u64;

        while consumed < total {
            let obs = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ReconcileError::new(FetchError::Cancelled)),
                next = rx.recv() => match next {
                    Some(obs) => obs,
                    None => {
                        return Err(ReconcileError::new(FailureCause::Internal(format!(
                            "queue closed after {consumed} of {total} blocks"
                        ))))
                    }
                },
            };
            let unit = obs.unit;

            let verified = verify_unit(&self.comparator, obs)
                .map_err(|cause| ReconcileError::new(cause).at_unit(unit))?;
            for warning in verified.warnings {
                warn!(unit, "{warning}");
                self.stats.warnings.fetch_add(1, Ordering::SeqCst);
                warnings.push(warning);
            }
            cursor.record(unit);
            self.stats.verified_unit(unit);

            let index = windows.index_of(unit);
            let closing = windows
                .contribute(unit, verified.logs)
                .map_err(|v| ReconcileError::new(v).at_unit(unit).at_window(index))?;
            if let Some(mut window) = closing {
                window
                    .close(&self.comparator)
                    .await
                    .map_err(|cause| ReconcileError::new(cause).at_window(index))?;
                self.stats.windows_closed.fetch_add(1, Ordering::SeqCst);
            }

            consumed += 1;
            if consumed % every == 0 || consumed == total {
                info!(
                    verified = consumed,
                    total,
                    contiguous = ?cursor.verified_through(),
                    in_flight = self.stats.in_flight(),
                    live_windows = windows.live(),
                    elapsed = ?began.elapsed(),
                    "progress"
                );
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn dispatch(
    sources: Pair<Source>,
    cfg: ReconcileConfig,
    tx: mpsc::Sender<Observation>,
    stats: Arc<RunStats>,
    failure: Arc<FirstFailure>,
) {
    let cancel = failure.cancel.clone();
    let permits = Arc::new(Semaphore::new(cfg.units.max(1)));
    let mut tasks = JoinSet::new();

    for unit in cfg.start..=cfg.end {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        while let Some(done) = tasks.try_join_next() {
            reap(done, &failure);
        }

        let sources = sources.clone();
        let tx = tx.clone();
        let stats = stats.clone();
        let failure = failure.clone();
        let limits = cfg.limits;
        tasks.spawn(async move {
            let _permit = permit;
            let cancel = failure.cancel.clone();

            stats.fetch_started();
            let fetched = fetch_unit(&sources, unit, &limits, &cancel).await;
            stats.fetch_finished();

            let obs = match fetched {
                Ok(obs) => obs,
                Err(e) if e.is_cancelled() => return,
                Err(e) => {
                    failure.record(ReconcileError::new(e).at_unit(unit));
                    return;
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                sent = tx.reserve() => {
                    if let Ok(slot) = sent {
                        stats.queue_depth(tx.max_capacity() - tx.capacity());
                        slot.send(obs);
                    }
                }
            }
        });
    }
    drop(tx);

    while let Some(done) = tasks.join_next().await {
        reap(done, &failure);
    }
    debug!("dispatcher drained");
}

fn reap(done: Result<(), tokio::task::JoinError>, failure: &FirstFailure) {
    if let Err(e) = done {
        if !e.is_cancelled() {
            failure.record(ReconcileError::new(FailureCause::Internal(format!(
                "fetch task ended abnormally: {e}"
            ))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_range_size() {
        let cfg = ReconcileConfig::new(100, 103);
        assert_eq!(cfg.total(), 4);
        assert_eq!(cfg.window_size, 1000);
        assert_eq!(cfg.units, 5);
        assert_eq!(cfg.queue_capacity, 100);
        assert_eq!(ReconcileConfig::new(5, 4).total(), 0);
    }

    #[test]
    fn stats_track_peaks() {
        let s = RunStats::default();
        assert_eq!(s.highest_verified(), None);
        s.fetch_started();
        s.fetch_started();
        s.fetch_finished();
        s.fetch_started();
        assert_eq!(s.in_flight(), 2);
        assert_eq!(s.max_in_flight(), 2);

        s.queue_depth(2);
        s.queue_depth(1);
        assert_eq!(s.max_queued(), 2);

        s.verified_unit(0);
        assert_eq!(s.highest_verified(), Some(0));
        s.verified_unit(7);
        s.verified_unit(3);
        assert_eq!(s.highest_verified(), Some(7));
        assert_eq!(s.verified(), 3);
    }

    #[test]
    fn first_failure_wins() {
        let f = FirstFailure {
            slot: Mutex::new(None),
            cancel: CancellationToken::new(),
        };
        f.record(ReconcileError::new(FailureCause::Internal("first".into())).at_unit(3));
        f.record(ReconcileError::new(FailureCause::Internal("second".into())).at_unit(9));
        assert!(f.cancel.is_cancelled());
        let err = f.take().unwrap();
        assert_eq!(err.unit, Some(3));
        assert!(f.take().is_none());
    }
}
