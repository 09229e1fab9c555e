//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the registry and discover applications
//! - Start background tasks (watcher, SIGHUP reload, control socket, metrics)
//! - Bind the main listener and serve until shutdown
//!
//! # Design Decisions
//! - Fail fast on the main listener; background helpers only log failures
//! - Applications are discovered before the listener starts (traffic only when ready)

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::app::{PortEvent, Registry};
use crate::config::{AppWatcher, ServerConfig};
use crate::content::Pipeline;
use crate::control::ControlServer;
use crate::http::HttpServer;
use crate::lifecycle::signals::{shutdown_signal, spawn_reload_on_hangup};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Core objects, wired but not yet serving.
pub struct Services {
    pub registry: Arc<Registry>,
    pub pipeline: Arc<Pipeline>,
    pub port_events: mpsc::UnboundedReceiver<PortEvent>,
}

/// Build the registry, load every application and the pipeline in front of it.
pub fn build(config: &ServerConfig) -> Services {
    let (tx, port_events) = mpsc::unbounded_channel();
    let registry = Arc::new(Registry::new(config.registry_settings()).with_port_events(tx));
    registry.discover(&config.apps.directories);
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&registry), config.pipeline_settings()));
    Services {
        registry,
        pipeline,
        port_events,
    }
}

/// Run the server until SIGINT/SIGTERM.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            ),
        }
    }

    let services = build(&config);
    let shutdown = Arc::new(Shutdown::new());

    let _watcher = if config.apps.watch {
        start_watcher(&config, Arc::clone(&services.registry), &shutdown)
    } else {
        None
    };

    if let Err(e) = spawn_reload_on_hangup(Arc::clone(&services.registry), &shutdown) {
        tracing::warn!(error = %e, "SIGHUP reload disabled");
    }

    if config.control.enabled {
        let control = ControlServer::new(&config.control.socket_path, Arc::clone(&services.registry));
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            if let Err(e) = control.run(&shutdown).await {
                tracing::error!(error = %e, "control server failed");
            }
        });
    }

    let listener = TcpListener::bind(&config.listener.bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: config.listener.bind_address.clone(),
            source,
        })?;

    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        applications = services.registry.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "sitehost ready"
    );

    HttpServer::new(services.pipeline, &config)
        .run(listener, services.port_events, &shutdown)
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Forward watcher events to the registry. Watch failures only disable hot reload.
fn start_watcher(
    config: &ServerConfig,
    registry: Arc<Registry>,
    shutdown: &Shutdown,
) -> Option<notify::RecommendedWatcher> {
    let (watcher, mut changes) = AppWatcher::new(&config.apps.directories);
    let watcher = match watcher.run() {
        Ok(watcher) => watcher,
        Err(e) => {
            tracing::warn!(error = %e, "application watcher disabled");
            return None;
        }
    };

    let mut stop = shutdown.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                change = changes.recv() => {
                    let Some(root) = change else { break };
                    match registry.refresh_root(&root) {
                        Ok(true) => tracing::info!(root = %root.display(), "application refreshed"),
                        Ok(false) => {}
                        Err(e) => tracing::warn!(root = %root.display(), error = %e, "application refresh failed"),
                    }
                }
                _ = stop.recv() => break,
            }
        }
    });
    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_build_discovers_applications() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("blog");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("app.conf"), "server { domains: blog.test; ports: 9100 }").unwrap();

        let mut config = ServerConfig::default();
        config.apps.directories = vec![dir.path().to_path_buf()];
        let mut services = build(&config);

        assert_eq!(services.registry.len(), 1);
        assert!(services.registry.route_host("blog.test").is_some());
        assert_eq!(
            services.port_events.try_recv().unwrap(),
            PortEvent::Bind { port: 9100, app: "blog".into() }
        );
    }
}
