//! Store trait definitions (ports).
//!
//! `JobStore` is the storage interface the infrastructure layer
//! (taskloom-infra) implements. The core crate never depends on any specific
//! storage technology; `memory` is a pure in-process implementation used by
//! tests and embedded hosts.

pub mod job;
pub mod memory;
