//! Infrastructure layer for taskloom.
//!
//! Contains the SQLite implementation of the `JobStore` trait defined in
//! `taskloom-core`, plus config file loading and data directory resolution.

pub mod config;
pub mod sqlite;
