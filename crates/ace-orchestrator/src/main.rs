//! On-demand orchestrator for a fleet of AceStream engine containers
//! behind optional VPN sidecars, with a stream-multiplexing proxy.

mod app;
mod config;
mod error;
mod events;
mod health_probe;
mod http;

use anyhow::Result;
use config::OrchestratorConfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ace_orchestrator=info,ace_engine=info,ace_vpn=info,ace_proxy=info".parse().unwrap()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting ace-orchestrator");
    info!(version = env!("CARGO_PKG_VERSION"), "build info");

    // Config load failure is the one place this process exits non-zero
    // before the async runtime has spawned anything (spec.md §7).
    let config = match OrchestratorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let (state, background) = app::build(&config).await?;
    let router = http::router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, "control plane listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = server.await {
        error!(error = %err, "control plane server error");
    }

    info!("shutdown signal received, stopping background tasks");
    background.shutdown().await;
    info!("ace-orchestrator stopped");
    Ok(())
}

/// Resolves once either Ctrl-C or SIGTERM arrives, whichever is first, so
/// the process shuts down the same way whether run interactively or under
/// a container orchestrator that sends SIGTERM (spec.md §5).
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl-C");
        }
        _ = terminate => {
            info!("received SIGTERM");
        }
    }
}
