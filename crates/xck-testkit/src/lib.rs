//! xck-testkit
//!
//! Fixtures for scenario tests: a deterministic pair of chain renderings
//! (`chain`) and an in-memory node that serves them (`fake`). No network.

pub mod chain;
pub mod fake;

pub use chain::{word, BlockData, ChainFixture, NodeData};
pub use fake::{sources, FakeSource, INJECTED_ERROR_CODE};
pub use xck_schemas::Pair;
