//! Contiguous verification cursor.
//!
//! Blocks are verified in arrival order, not block order. The cursor tracks
//! the highest block `c` such that every block in `[start, c]` has been
//! verified. It is diagnostic only: failures and progress lines report it so
//! an operator knows which prefix of the range is already confirmed.
//!
//! # Invariants
//!
//! - **Monotonic**: the cursor never moves backwards.
//! - **Gap-free**: the cursor only advances across blocks that were recorded.
//! - **Bounded pending set**: blocks above a gap are parked until the gap
//!   closes, then drained.

use std::collections::BTreeSet;

use xck_schemas::UnitKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContiguousCursor {
    start: UnitKey,
    verified_through: Option<UnitKey>,
    pending: BTreeSet<UnitKey>,
}

impl ContiguousCursor {
    pub fn new(start: UnitKey) -> Self {
        Self {
            start,
            verified_through: None,
            pending: BTreeSet::new(),
        }
    }

    /// The next block the cursor is waiting on.
    fn next(&self) -> UnitKey {
        match self.verified_through {
            Some(c) => c + 1,
            None => self.start,
        }
    }

    /// Record `unit` as verified. Returns `true` if the cursor advanced.
    ///
    /// Units below the cursor or already pending are ignored.
    pub fn record(&mut self, unit: UnitKey) -> bool {
        let next = self.next();
        if unit < next {
            return false;
        }
        if unit > next {
            self.pending.insert(unit);
            return false;
        }

        let mut through = unit;
        while self.pending.remove(&(through + 1)) {
            through += 1;
        }
        self.verified_through = Some(through);
        true
    }

    pub fn verified_through(&self) -> Option<UnitKey> {
        self.verified_through
    }

    /// Blocks verified above the first gap.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cursor_has_verified_nothing() {
        let c = ContiguousCursor::new(100);
        assert_eq!(c.verified_through(), None);
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn in_order_advances_one_by_one() {
        let mut c = ContiguousCursor::new(100);
        for unit in 100..105 {
            assert!(c.record(unit));
            assert_eq!(c.verified_through(), Some(unit));
        }
    }

    #[test]
    fn gap_parks_then_drains() {
        let mut c = ContiguousCursor::new(10);
        assert!(!c.record(12));
        assert!(!c.record(13));
        assert!(!c.record(11));
        assert_eq!(c.verified_through(), None);
        assert_eq!(c.pending(), 3);

        assert!(c.record(10));
        assert_eq!(c.verified_through(), Some(13));
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn duplicates_and_stragglers_do_not_move_it() {
        let mut c = ContiguousCursor::new(0);
        assert!(c.record(0));
        assert!(c.record(1));
        assert!(!c.record(1));
        assert!(!c.record(0));
        assert!(!c.record(3));
        assert!(!c.record(3));
        assert_eq!(c.verified_through(), Some(1));
        assert_eq!(c.pending(), 1);
    }
}
