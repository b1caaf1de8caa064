//! Window Accumulator.
//!
//! A window owns the blocks `[index * size, (index + 1) * size)`, clipped to
//! the run's range. It is created when the first of its blocks is verified,
//! which is also when its aggregate fetch is launched. Each verified block
//! drops its logs into a slot; the last slot to fill moves the window to
//! `Closing`, and the consumer then awaits the aggregate and cross-checks it
//! before the window is `Done`.
//!
//! Only the consumption loop touches a [`WindowSet`], so there is no locking.

use std::collections::{BTreeMap, BTreeSet};

use tokio::task::JoinHandle;
use tracing::debug;
use xck_compare::{raw, CompareError, Comparator};
use xck_fetch::{join_aggregate, AggregateSet, FetchError};
use xck_schemas::{Log, UnitKey};

use crate::error::{FailureCause, InvariantViolation};

pub type AggregateHandle = JoinHandle<Result<AggregateSet, FetchError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Open,
    Closing,
    Done,
}

#[derive(Debug)]
pub struct Window {
    index: u64,
    start: UnitKey,
    end: UnitKey,
    state: WindowState,
    slots: Vec<Option<Vec<Log>>>,
    remaining: usize,
    aggregate: Option<AggregateHandle>,
}

impl Window {
    /// `[start, end)` must be non-empty.
    pub fn new(index: u64, start: UnitKey, end: UnitKey, aggregate: AggregateHandle) -> Self {
        let len = end.saturating_sub(start) as usize;
        Self {
            index,
            start,
            end,
            state: WindowState::Open,
            slots: (0..len).map(|_| None).collect(),
            remaining: len,
            aggregate: Some(aggregate),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn start(&self) -> UnitKey {
        self.start
    }

    /// Exclusive.
    pub fn end(&self) -> UnitKey {
        self.end
    }

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Store `unit`'s logs. Returns `true` when this was the last open slot.
    pub fn contribute(&mut self, unit: UnitKey, logs: Vec<Log>) -> Result<bool, InvariantViolation> {
        if self.state != WindowState::Open {
            return Err(InvariantViolation::new(format!(
                "window {} received block {unit} after it stopped accepting contributions",
                self.index
            )));
        }
        if unit < self.start || unit >= self.end {
            return Err(InvariantViolation::new(format!(
                "block {unit} routed to window {} covering [{}, {})",
                self.index, self.start, self.end
            )));
        }
        let slot = &mut self.slots[(unit - self.start) as usize];
        if slot.is_some() {
            return Err(InvariantViolation::new(format!(
                "block {unit} contributed twice to window {}",
                self.index
            )));
        }
        *slot = Some(logs);
        self.remaining -= 1;
        if self.remaining == 0 {
            self.state = WindowState::Closing;
        }
        Ok(self.remaining == 0)
    }

    /// Contributions concatenated in block order.
    pub fn contributions(&self) -> Vec<Log> {
        self.slots.iter().flatten().flatten().cloned().collect()
    }

    /// Await the aggregate and run the window cross-check.
    pub async fn close(&mut self, comparator: &Comparator) -> Result<(), FailureCause> {
        if self.state != WindowState::Closing {
            return Err(InvariantViolation::new(format!(
                "window {} closed with {} slot(s) still open",
                self.index, self.remaining
            ))
            .into());
        }
        let handle = self
            .aggregate
            .take()
            .ok_or_else(|| InvariantViolation::new(format!("window {} closed twice", self.index)))?;
        let aggregate = join_aggregate(handle).await?;
        let contributions = self.contributions();
        cross_check(comparator, &aggregate, &contributions)?;
        self.state = WindowState::Done;
        debug!(
            window = self.index,
            start = self.start,
            end = self.end,
            logs = contributions.len(),
            "window cross-checked"
        );
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.aggregate.take() {
            handle.abort();
        }
    }
}

/// The window-level checks, in order:
///
/// 1. typed logs agree between the nodes;
/// 2. raw logs agree between the nodes;
/// 3. the reference node reports as many logs as the blocks contributed;
/// 4. the reference typed logs are exactly the contributions, in block order;
/// 5. the raw reference logs decode to the typed reference logs.
pub fn cross_check(
    comparator: &Comparator,
    aggregate: &AggregateSet,
    contributions: &[Log],
) -> Result<(), CompareError> {
    let typed = &aggregate.typed.reference;
    comparator.records("typed logs", typed.as_slice(), aggregate.typed.candidate.as_slice())?;
    comparator.values("raw logs", &aggregate.raw.reference, &aggregate.raw.candidate)?;
    comparator.records("log count against block receipts", &typed.len(), &contributions.len())?;
    comparator.records("typed logs against block receipts", typed.as_slice(), contributions)?;

    let decoded: Vec<Log> = raw::decode(&aggregate.raw.reference, "raw reference logs")?;
    comparator.records("raw reference logs decoded", typed.as_slice(), decoded.as_slice())?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Live set
// ---------------------------------------------------------------------------

/// Live windows of one run, keyed by window index.
///
/// `launch(index, start, end)` starts the aggregate fetch for a new window.
pub struct WindowSet<L> {
    size: u64,
    first: UnitKey,
    last: UnitKey,
    live: BTreeMap<u64, Window>,
    closed: BTreeSet<u64>,
    launch: L,
}

impl<L> WindowSet<L>
where
    L: FnMut(u64, UnitKey, UnitKey) -> AggregateHandle,
{
    /// Windows for the inclusive range `[first, last]`. `size` must be non-zero.
    pub fn new(size: u64, first: UnitKey, last: UnitKey, launch: L) -> Self {
        Self {
            size: size.max(1),
            first,
            last,
            live: BTreeMap::new(),
            closed: BTreeSet::new(),
            launch,
        }
    }

    pub fn index_of(&self, unit: UnitKey) -> u64 {
        unit / self.size
    }

    /// `[start, end)` of window `index`, clipped to the range.
    pub fn bounds(&self, index: u64) -> (UnitKey, UnitKey) {
        let start = index.saturating_mul(self.size).max(self.first);
        let end = index
            .saturating_add(1)
            .saturating_mul(self.size)
            .min(self.last.saturating_add(1));
        (start, end)
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn closed(&self) -> usize {
        self.closed.len()
    }

    /// Route `unit`'s logs to its window, creating the window on first use.
    ///
    /// When the contribution completes the window it is removed from the live
    /// set and handed back in `Closing` state for the caller to close.
    pub fn contribute(&mut self, unit: UnitKey, logs: Vec<Log>) -> Result<Option<Window>, InvariantViolation> {
        if unit < self.first || unit > self.last {
            return Err(InvariantViolation::new(format!(
                "block {unit} outside the run range [{}, {}]",
                self.first, self.last
            )));
        }
        let index = self.index_of(unit);
        if self.closed.contains(&index) {
            return Err(InvariantViolation::new(format!(
                "block {unit} arrived for window {index}, which already closed"
            )));
        }
        if !self.live.contains_key(&index) {
            let (start, end) = self.bounds(index);
            let handle = (self.launch)(index, start, end);
            debug!(window = index, start, end, "window opened");
            self.live.insert(index, Window::new(index, start, end, handle));
        }
        let complete = match self.live.get_mut(&index) {
            Some(window) => window.contribute(unit, logs)?,
            None => return Err(InvariantViolation::new(format!("window {index} vanished"))),
        };
        if !complete {
            return Ok(None);
        }
        self.closed.insert(index);
        Ok(self.live.remove(&index))
    }

    /// Stop every in-flight aggregate fetch. Used when the run aborts.
    pub fn abort_all(&mut self) {
        for window in self.live.values_mut() {
            window.abort();
        }
        self.live.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use xck_compare::RuleSet;
    use xck_schemas::{Pair, B256};

    fn log(block: u64, index: u64) -> Log {
        Log {
            block_number: block,
            log_index: index,
            block_hash: B256([block as u8; 32]),
            ..Log::default()
        }
    }

    fn aggregate_of(logs: &[Log]) -> AggregateSet {
        let raw = serde_json::to_value(logs).unwrap();
        AggregateSet {
            typed: Pair::new(logs.to_vec(), logs.to_vec()),
            raw: Pair::new(raw.clone(), raw),
        }
    }

    fn ready(set: AggregateSet) -> AggregateHandle {
        tokio::spawn(async move { Ok(set) })
    }

    #[test]
    fn bounds_are_clipped_to_the_range() {
        let set = WindowSet::new(10, 95, 121, |_, _, _| unreachable!());
        assert_eq!(set.index_of(95), 9);
        assert_eq!(set.bounds(9), (95, 100));
        assert_eq!(set.bounds(10), (100, 110));
        assert_eq!(set.bounds(12), (120, 122));
    }

    #[tokio::test]
    async fn window_closes_once_after_last_slot() {
        let logs = vec![log(4, 0), log(5, 0), log(5, 1)];
        let agg = aggregate_of(&logs);
        let mut launches = 0;
        let mut set = WindowSet::new(2, 4, 5, |_, _, _| {
            launches += 1;
            ready(agg.clone())
        });

        assert!(set.contribute(5, vec![log(5, 0), log(5, 1)]).unwrap().is_none());
        assert_eq!(set.live(), 1);
        let mut window = set.contribute(4, vec![log(4, 0)]).unwrap().unwrap();
        assert_eq!(window.state(), WindowState::Closing);
        assert_eq!(set.live(), 0);
        assert_eq!(set.closed(), 1);

        let cmp = Comparator::new(RuleSet::all(), 0);
        window.close(&cmp).await.unwrap();
        assert_eq!(window.state(), WindowState::Done);
        drop(set);
        assert_eq!(launches, 1);
    }

    #[tokio::test]
    async fn late_or_duplicate_contribution_is_an_invariant_violation() {
        let mut set = WindowSet::new(2, 0, 3, |_, _, _| ready(aggregate_of(&[])));
        set.contribute(0, Vec::new()).unwrap();
        assert!(set.contribute(0, Vec::new()).is_err());
        set.contribute(1, Vec::new()).unwrap().unwrap();
        assert!(set.contribute(1, Vec::new()).is_err());
        assert!(set.contribute(4, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn closing_an_incomplete_window_fails() {
        let mut w = Window::new(0, 0, 2, ready(aggregate_of(&[])));
        w.contribute(0, Vec::new()).unwrap();
        let cmp = Comparator::new(RuleSet::all(), 0);
        assert!(w.close(&cmp).await.is_err());
    }

    #[test]
    fn cross_check_catches_each_disagreement() {
        let cmp = Comparator::new(RuleSet::all(), 0);
        let logs = vec![log(1, 0), log(2, 0)];
        let good = aggregate_of(&logs);
        assert!(cross_check(&cmp, &good, &logs).is_ok());

        let mut typed_diverges = good.clone();
        typed_diverges.typed.candidate[1].log_index = 9;
        let err = cross_check(&cmp, &typed_diverges, &logs).unwrap_err();
        assert!(matches!(err, CompareError::Mismatch(ref e) if e.label == "typed logs"));

        let mut raw_diverges = good.clone();
        raw_diverges.raw.candidate = Value::Array(Vec::new());
        let err = cross_check(&cmp, &raw_diverges, &logs).unwrap_err();
        assert!(matches!(err, CompareError::Mismatch(ref e) if e.label == "raw logs"));

        let err = cross_check(&cmp, &good, &logs[..1]).unwrap_err();
        assert!(matches!(err, CompareError::Mismatch(ref e) if e.label == "log count against block receipts"));

        let reordered = vec![logs[1].clone(), logs[0].clone()];
        let err = cross_check(&cmp, &good, &reordered).unwrap_err();
        assert!(matches!(err, CompareError::Mismatch(ref e) if e.label == "typed logs against block receipts"));

        let mut raw_lies = good.clone();
        let lie = serde_json::to_value(vec![log(1, 0), log(2, 7)]).unwrap();
        raw_lies.raw = Pair::new(lie.clone(), lie);
        let err = cross_check(&cmp, &raw_lies, &logs).unwrap_err();
        assert!(matches!(err, CompareError::Mismatch(ref e) if e.label == "raw reference logs decoded"));

        let mut undecodable = good;
        undecodable.raw = Pair::new(Value::Bool(true), Value::Bool(true));
        assert!(matches!(
            cross_check(&cmp, &undecodable, &logs),
            Err(CompareError::Protocol(_))
        ));
    }
}
