//! Implementations of the ports.
//!
//! - `memory_store`: in-memory transactional store (both concurrency modes)
//! - `lock_table` / `versions`: its row locks and multi-version rows
//! - `fault`: fault injection used by tests and demos

pub mod fault;
mod lock_table;
pub mod memory_store;
mod versions;

pub use self::fault::FaultPoint;
pub use self::memory_store::{InMemoryStore, MemoryTransaction, StoreConfig};
