//! Correlation engine: pending requests and their exactly-once resolution.

pub mod pending;

pub use pending::{
    cleanup_task, CorrelationError, PendingRequestStore, PendingSnapshot, PendingStats,
    Resolution, Resolved,
};
