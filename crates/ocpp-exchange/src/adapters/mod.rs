//! Transport adapters.

pub mod memory;

pub use memory::{MemoryError, MemoryNetwork, MemoryTransport, Tamper};
