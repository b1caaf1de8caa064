//! xck-reconcile
//!
//! Block-by-block reconciliation of a legacy node against its migrated
//! successor.
//!
//! - `verify`: every per-block check, in a fixed order
//! - `window`: per-window log accumulation and the window cross-check
//! - `cursor`: contiguous verified prefix, for diagnostics
//! - `engine`: bounded dispatch, bounded queue, single consumer, first-error
//!   cancellation
//! - `plan`: preflight against the live nodes
//!
//! There is no partial success: a run verifies its whole range or returns the
//! first failure with the block (or window) and the contiguous cursor.

pub mod cursor;
pub mod engine;
pub mod error;
pub mod plan;
pub mod verify;
pub mod window;

pub use cursor::ContiguousCursor;
pub use engine::{
    Reconciler, ReconcileConfig, RunStats, RunSummary, DEFAULT_QUEUE_CAPACITY, DEFAULT_UNIT_CONCURRENCY,
    DEFAULT_WINDOW_SIZE,
};
pub use error::{FailureCause, FailureKind, InvariantViolation, ReconcileError};
pub use plan::{preflight, PreflightError, RunPlan, HEAD_MARGIN};
pub use verify::{verify_unit, Verified};
pub use window::{cross_check, AggregateHandle, Window, WindowSet, WindowState};
