//! Shared domain types for taskloom.
//!
//! This crate contains the persisted job model (jobs, checkpoint ledger, step
//! records, lock tokens), run summaries, configuration, and the store error
//! type shared by the core and infrastructure crates.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod job;
pub mod run;
