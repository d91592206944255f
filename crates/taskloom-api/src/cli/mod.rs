//! CLI command definitions and dispatch for the `taskloom` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod enqueue;
pub mod jobs;
pub mod run;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Durable job queue with checkpointed workflows.
#[derive(Parser)]
#[command(name = "taskloom", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Claim and process jobs from a queue.
    Run(run::RunArgs),

    /// Validate and enqueue a job.
    Enqueue {
        #[command(subcommand)]
        target: enqueue::EnqueueTarget,
    },

    /// Inspect and clean up jobs.
    Jobs {
        #[command(subcommand)]
        action: jobs::JobsCommand,
    },

    /// Start the HTTP trigger surface and any `[[auto_run]]` schedules.
    Serve {
        /// Port to listen on (defaults to `[server].port`).
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (defaults to `[server].host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Default tracing directives for the chosen verbosity.
pub fn log_filter(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn",
        1 => "info,taskloom=debug",
        _ => "trace",
    }
}
