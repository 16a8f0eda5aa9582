//! taskflow server
//!
//! One binary, several deployable roles. `--service all` runs the task API,
//! the recurrence consumer and the notification consumer in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use taskflow::config::{print_env_help, ServerConfig, ServiceRole};
use taskflow::constants::{DATABASE_FLUSH_TIMEOUT_SECS, GRACEFUL_SHUTDOWN_TIMEOUT_SECS};
use taskflow::handlers::reminders::run_sweep_loop;
use taskflow::handlers::{build_router, run_local_dispatcher, ServiceState};
use taskflow::tracing_setup::{self, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "taskflow", version, about = "Event-driven todo services")]
struct Cli {
    /// Which service(s) this process runs
    #[arg(long, env = "TASKFLOW_SERVICE", value_enum, default_value_t = ServiceRole::All)]
    service: ServiceRole,

    /// Print the environment variables this binary reads, then exit
    #[arg(long)]
    env_help: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.env_help {
        print_env_help();
        return Ok(());
    }

    tracing_setup::init_tracing(LogFormat::from_env())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let config = ServerConfig::from_env();
    let role = cli.service;

    taskflow::metrics::register_metrics().context("Failed to register metrics")?;
    config.log(role);

    let state = Arc::new(ServiceState::new(config.clone(), role)?);

    // Subscribe before serving so no early publish is missed
    if let Some(bus) = state.local_bus() {
        let receiver = bus.subscribe();
        tokio::spawn(run_local_dispatcher(state.clone(), receiver));
        info!("In-process event bus attached");
    }

    if config.sweep_interval_secs > 0 && role.runs_notifications() {
        tokio::spawn(run_sweep_loop(
            state.clone(),
            Duration::from_secs(config.sweep_interval_secs),
        ));
    }

    let app = build_router(state.clone())
        .layer(axum::middleware::from_fn(taskflow::middleware::track_metrics))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests))
        .layer(config.cors.to_layer())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!(
        service = role.as_str(),
        "Server listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown signal received, flushing task store...");

    let cleanup_future = async {
        let flush_future = async { state.flush() };

        match tokio::time::timeout(
            Duration::from_secs(DATABASE_FLUSH_TIMEOUT_SECS),
            flush_future,
        )
        .await
        {
            Ok(Ok(())) => info!("Task store flushed"),
            Ok(Err(e)) => tracing::error!("Failed to flush task store: {:#}", e),
            Err(_) => tracing::error!(
                "Task store flush timed out after {}s",
                DATABASE_FLUSH_TIMEOUT_SECS
            ),
        }
    };

    match tokio::time::timeout(
        Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS),
        cleanup_future,
    )
    .await
    {
        Ok(()) => info!("Server shutdown complete"),
        Err(_) => {
            tracing::error!(
                "Graceful shutdown timed out after {}s, forcing exit",
                GRACEFUL_SHUTDOWN_TIMEOUT_SECS
            );
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Starting graceful shutdown");
}
