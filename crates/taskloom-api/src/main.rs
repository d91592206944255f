//! Taskloom CLI and HTTP trigger entry point.
//!
//! Binary name: `taskloom`
//!
//! Parses CLI arguments, loads configuration, opens the job store, then
//! dispatches to the command handler or starts the HTTP server.

mod builtin;
mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use taskloom_core::engine::scheduler::RunScheduler;
use taskloom_infra::config::{apply_env_overrides, load_config, resolve_data_dir};
use taskloom_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};
use taskloom_types::config::TaskloomConfig;
use taskloom_types::run::{RunRequest, Trigger};
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or a store
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "taskloom", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    let loaded = load_config(&data_dir).await;

    let otel = cli.otel || loaded.as_ref().is_ok_and(|c| c.observability.otel);
    let options = TracingOptions::new(cli::log_filter(cli.verbose, cli.quiet))
        .with_json(cli.json)
        .with_otel(otel);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let mut config = loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "invalid config.toml, using defaults");
        let mut config = TaskloomConfig::default();
        apply_env_overrides(&mut config);
        config
    });

    if let Commands::Serve { host, port } = &cli.command {
        if let Some(host) = host {
            config.server.host = host.clone();
        }
        if let Some(port) = port {
            config.server.port = *port;
        }
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        }
    });

    tracing::debug!(data_dir = %data_dir.display(), "opening job store");
    let state = AppState::init(data_dir, config, shutdown.clone()).await?;

    let result = dispatch(cli, state, shutdown).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => {
            cli::run::handle_run(args, &state, shutdown, cli.json, cli.quiet).await?;
        }

        Commands::Enqueue { target } => {
            cli::enqueue::handle_enqueue(target, &state, cli.json).await?;
        }

        Commands::Jobs { action } => {
            cli::jobs::handle_jobs(action, &state, cli.json).await?;
        }

        Commands::Serve { .. } => {
            serve(state, shutdown, cli.quiet).await?;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

/// Serve the HTTP surface and fire `[[auto_run]]` schedules until shutdown.
async fn serve(state: AppState, shutdown: CancellationToken, quiet: bool) -> anyhow::Result<()> {
    let scheduler = RunScheduler::new();
    if !state.config.auto_run.is_empty() {
        scheduler.start().await?;
        for auto in &state.config.auto_run {
            let request = RunRequest::new(auto.queue.clone(), auto.limit)
                .triggered_by(Trigger::Cron);
            let callback = cli::run::run_callback(state.runner.clone(), request, |summary| {
                tracing::info!(
                    queue = %summary.queue,
                    claimed = summary.claimed(),
                    stop_reason = ?summary.stop_reason,
                    elapsed_ms = summary.elapsed_ms,
                    "scheduled run finished"
                );
            });
            scheduler.schedule(&auto.queue, &auto.cron, callback).await?;
        }
    }

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    if !quiet {
        println!(
            "  {} Taskloom listening on {}",
            console::style("*").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    scheduler.stop().await?;

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
