//! `quiesce` entry point.
//!
//! `serve` runs the detector behind the HTTP API; `register`, `complete` and
//! `status` talk to a running server.

use anyhow::{Context, Result};
use clap::Parser;
use quiesce_core::app::DetectorBuilder;
use quiesce_core::domain::{ProcessId, TaskId};
use tracing::{error, info};

use quiesce_cli::api;
use quiesce_cli::cli::{Cli, ClientArgs, Command, ServeArgs};
use quiesce_cli::client::QuiesceClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Register(args) => {
            let (client, process_id, task_id) =
                task_target(&args.task.client, &args.task.process_id, &args.task.task_id)?;
            let result = client
                .register_task(&process_id, &task_id, args.heartbeat())
                .await
                .context("register failed")?;
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Command::Complete(args) => {
            let (client, process_id, task_id) =
                task_target(&args.client, &args.process_id, &args.task_id)?;
            let result = client
                .complete_task(&process_id, &task_id)
                .await
                .context("complete failed")?;
            println!("{}", serde_json::to_string(&result)?);
            Ok(())
        }
        Command::Status(args) => {
            let client = QuiesceClient::new(&args.client.url, args.client.timeout)?;
            let process_id = ProcessId::parse(args.process_id)?;
            let report = client
                .process_status(&process_id)
                .await
                .context("status query failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let app = DetectorBuilder::new()
        .config(args.detector_config())
        .build()
        .context("invalid detector configuration")?;
    let reaper = app.reaper.spawn();

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind to {}", args.listen))?;
    info!(
        address = %args.listen,
        retention = %humantime::format_duration(app.config.retention),
        staleness_threshold = %humantime::format_duration(app.config.staleness_threshold),
        "quiesce listening"
    );

    axum::serve(listener, api::router(app.detector))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    reaper.shutdown_and_join().await;
    info!("quiesce stopped");
    Ok(())
}

fn task_target(
    client: &ClientArgs,
    process_id: &str,
    task_id: &str,
) -> Result<(QuiesceClient, ProcessId, TaskId)> {
    Ok((
        QuiesceClient::new(&client.url, client.timeout)?,
        ProcessId::parse(process_id)?,
        TaskId::parse(task_id)?,
    ))
}

/// Initialize tracing.
///
/// When `verbose` is true, sets filter to `debug`. Otherwise, respects
/// `RUST_LOG` and falls back to `info`.
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "unable to install Ctrl+C signal handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
