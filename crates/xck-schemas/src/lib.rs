//! xck-schemas
//!
//! Shared record types for the ledger cross-check workspace.
//!
//! - `hex`: `0x`-prefixed wire primitives (hashes, addresses, byte strings, quantities)
//! - `block`: block headers and blocks, including the identity hash derivation
//! - `tx`: transactions as decoded by the typed query path
//! - `receipt`: receipts and event logs
//! - `role`: the two source roles and a per-role pair container
//!
//! Pure data. No IO.

pub mod block;
pub mod hex;
pub mod receipt;
pub mod role;
pub mod tx;

pub use block::{keccak256, Block, Header};
pub use self::hex::{Address, BlockNonce, Bytes, HexError, Quantity, B256};
pub use receipt::{Log, Receipt};
pub use role::{Pair, Role, UnitKey};
pub use tx::{AccessListItem, Transaction};
