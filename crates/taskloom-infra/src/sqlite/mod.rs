//! SQLite storage layer.
//!
//! The job store backed by SQLite with WAL mode and split read/write
//! connection pools.

pub mod job;
pub mod pool;
