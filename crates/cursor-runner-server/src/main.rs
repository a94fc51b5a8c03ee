use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use cursor_runner_core::config::SupervisorSettings;
use cursor_runner_server::routes;
use cursor_runner_server::state::AppState;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The agent's stdout can legitimately be large, but the inbound prompt
/// body never needs to be: 1 MiB is generous headroom over any realistic
/// prompt.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cursor_runner_core::init_tracing();

    let settings = SupervisorSettings::from_env().context("invalid supervisor configuration")?;
    let state = AppState::build(settings).await.context("failed to initialise application state")?;

    let app = routes::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES));

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()
        .context("invalid BIND_ADDR")?;

    info!(%addr, "cursor-runner listening");
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("server error")?;

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then trips the shared [`cursor_runner_core::cancel::CancelToken`]
/// so in-flight Process Supervisor calls enter the termination protocol
/// (spec §4.G "Cancellation") before this future returns and `axum::serve`
/// stops accepting new connections.
async fn shutdown_signal(state: AppState) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, cancelling in-flight executions");
    state.shutdown.cancel();
    // give in-flight terminations a moment to complete their two-phase
    // process-group shutdown before the process exits.
    tokio::time::sleep(Duration::from_millis(1500)).await;
}
