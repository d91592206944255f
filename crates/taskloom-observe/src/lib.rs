//! Observability setup for taskloom binaries.

pub mod tracing_setup;
