//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT/SIGTERM and turn them into a shutdown
//! - Turn SIGHUP into a reload of every application
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers application reload, not shutdown

use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;

use crate::app::Registry;
use crate::lifecycle::Shutdown;

/// Resolve on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

/// Reload all applications on every SIGHUP until shutdown.
#[cfg(unix)]
pub fn spawn_reload_on_hangup(registry: Arc<Registry>, shutdown: &Shutdown) -> std::io::Result<JoinHandle<()>> {
    let mut hangup = signal::unix::signal(signal::unix::SignalKind::hangup())?;
    let mut stop = shutdown.subscribe();
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    let changed = registry.reload_all();
                    tracing::info!(changed, "SIGHUP: applications reloaded");
                }
                _ = stop.recv() => break,
            }
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_reload_on_hangup(_registry: Arc<Registry>, _shutdown: &Shutdown) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async {}))
}
