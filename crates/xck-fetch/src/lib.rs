//! xck-fetch
//!
//! Retrieval for the cross-checker. Two fetchers, both cancellable and both
//! bounded by a wall-clock deadline:
//!
//! - `unit`: every facet of one block from both nodes
//! - `aggregate`: the window-scoped log sets from both nodes
//!
//! No retries. Any failure is returned as a [`FetchError`] and is fatal to the run.

pub mod aggregate;
pub mod error;
pub mod unit;

use std::time::Duration;

pub use aggregate::{fetch_aggregate, join_aggregate, AggregateSet};
pub use error::FetchError;
pub use unit::{fetch_unit, Observation};

pub const DEFAULT_SUB_FETCHES: usize = 10;
pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WINDOW_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    /// Concurrent facet calls per unit.
    pub sub_fetches: usize,
    pub unit_timeout: Duration,
    pub window_timeout: Duration,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            sub_fetches: DEFAULT_SUB_FETCHES,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            window_timeout: DEFAULT_WINDOW_TIMEOUT,
        }
    }
}
