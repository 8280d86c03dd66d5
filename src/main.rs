//! Switchyard HTTP server
//!
//! Loads configuration, wires the core, starts the health monitor, and
//! serves the tool surface until a shutdown signal arrives. Shutdown
//! drains in-flight requests for a bounded window, then flushes the
//! empirical snapshot and exits.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use switchyard::cli::{Cli, Command, generate_config_template};
use switchyard::config::Config;
use switchyard::endpoints::HealthMonitor;
use switchyard::handlers::{AppState, build_app};
use switchyard::telemetry;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = cli.command {
        match output {
            Some(path) => {
                std::fs::write(&path, generate_config_template())?;
                println!("Wrote configuration template to {}", path);
            }
            None => print!("{}", generate_config_template()),
        }
        return Ok(());
    }

    let config = Arc::new(Config::from_file(&cli.config)?);
    telemetry::init(&config.observability.log_level);

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        endpoints = config.endpoints.len(),
        "Starting Switchyard"
    );

    let shutdown = CancellationToken::new();
    let state = AppState::new(config.clone(), shutdown.clone())?;

    // Background health probing: one immediate sweep, then periodic.
    let monitor = Arc::new(HealthMonitor::new(state.registry().clone(), &config)?);
    let monitor_handle = monitor.spawn(shutdown.clone());

    let ip_addr = config.server.host.parse::<std::net::IpAddr>().map_err(|e| {
        format!(
            "Invalid IP address '{}' in {}: {}. Expected format: 0.0.0.0 or 127.0.0.1",
            config.server.host, cli.config, e
        )
    })?;
    let addr = SocketAddr::from((ip_addr, config.server.port));

    let app = build_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    // On signal: stop accepting immediately, let in-flight requests run
    // up to the drain window, then cancel the root token to abort the
    // stragglers so serve() can return.
    let serve_shutdown = shutdown.clone();
    let drain = config.drain_window();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            tracing::info!(
                drain_ms = drain.as_millis() as u64,
                "Shutdown signal received, draining in-flight requests"
            );
            tokio::spawn(async move {
                tokio::time::sleep(drain).await;
                serve_shutdown.cancel();
            });
        })
        .await?;

    if let Some(path) = &config.routing.snapshot_path {
        if let Err(e) = state.learner().snapshot_to(path) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to write empirical snapshot"
            );
        }
    }

    monitor_handle.abort();
    tracing::info!("Switchyard stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("SIGTERM handler must install");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
