//! Job execution engine: checkpointing, retries, step execution, workflow
//! replay and the runner loop.
//!
//! - `checkpoint` -- per-claim ledger cache with lock-guarded writes
//! - `retry` -- retry policy, backoff and the stateless retry handler
//! - `executor` -- one attempt of one task step
//! - `orchestrator` -- replay-based workflow passes and `WorkflowSteps`
//! - `runner` -- claim, dispatch and finalize loop with a bounded worker pool
//! - `scheduler` -- cron-driven recurring runs

pub mod checkpoint;
pub mod executor;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod scheduler;
