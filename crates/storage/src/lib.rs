//! Storage layer for gatehouse.
//!
//! [`GateStorage`] is the transactional seam the engine runs against. The
//! crate ships an in-memory backend and a conformance suite that any other
//! backend can run against itself.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStorage};
pub use record::{EntityRecord, LedgerRecord};
pub use traits::GateStorage;
