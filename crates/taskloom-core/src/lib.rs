//! Job execution engine and store trait definitions for taskloom.
//!
//! This crate defines the `JobStore` port that the infrastructure layer
//! implements, plus everything that runs on top of it: the definition
//! registry, the task executor, the replaying workflow orchestrator and the
//! runner loop. It depends only on `taskloom-types` -- never on
//! `taskloom-infra` or any database crate.

pub mod access;
pub mod definition;
pub mod engine;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod schema;
