//! Adapters implementing the persistence ports.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryState, MemoryStore};
pub use postgres::{PostgresSalesCounter, PostgresStore};
