//! Configuration types for taskloom.
//!
//! `TaskloomConfig` mirrors `config.toml` in the data directory. Every field
//! has a default so an empty or missing file yields a working setup.

use serde::{Deserialize, Serialize};

use crate::job::DEFAULT_QUEUE;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskloomConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Recurring run cycles scheduled by `taskloom serve`.
    #[serde(default)]
    pub auto_run: Vec<AutoRunConfig>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Runner loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Queue used when a trigger does not name one.
    #[serde(default = "default_queue")]
    pub default_queue: String,

    /// Jobs claimed per run when a trigger does not give a limit.
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// A `running` job whose lock is older than this is treated as crashed
    /// and may be reclaimed.
    #[serde(default = "default_lock_stale_after_secs")]
    pub lock_stale_after_secs: u64,

    /// Worker count within one run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delete job rows as soon as they finalize `completed`.
    #[serde(default)]
    pub delete_job_on_complete: bool,

    /// Optional wall-clock budget for starting new claims.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget_secs: Option<u64>,
}

fn default_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

fn default_limit() -> u32 {
    10
}

fn default_lock_stale_after_secs() -> u64 {
    300
}

fn default_concurrency() -> usize {
    1
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_queue: default_queue(),
            default_limit: default_limit(),
            lock_stale_after_secs: default_lock_stale_after_secs(),
            concurrency: default_concurrency(),
            delete_job_on_complete: false,
            time_budget_secs: None,
        }
    }
}

/// HTTP trigger surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret accepted by the run endpoint. `TASKLOOM_RUN_SECRET`
    /// takes precedence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_secret: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            run_secret: None,
        }
    }
}

/// One recurring run: cron expression plus run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRunConfig {
    pub cron: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Bridge tracing spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}
