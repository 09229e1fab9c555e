//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all handler
//! - Wire up middleware (tracing, timeout, panic capture, request ID, limits)
//! - Serve the main listener (host-routed) and one listener per application port
//! - Open and close application ports as the registry reports binding changes
//! - Hand every request to the content pipeline

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::app::PortEvent;
use crate::config::ServerConfig;
use crate::content::{IncomingRequest, Pipeline};
use crate::http::request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
use crate::lifecycle::Shutdown;
use crate::observability::tracing::request_span;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Set on listeners opened for one application's port.
    pub bound_port: Option<u16>,
}

/// HTTP front end of the hosting server.
pub struct HttpServer {
    pipeline: Arc<Pipeline>,
    request_timeout: Duration,
    max_connections: usize,
}

impl HttpServer {
    pub fn new(pipeline: Arc<Pipeline>, config: &ServerConfig) -> Self {
        Self {
            pipeline,
            request_timeout: config.timeouts.request(),
            max_connections: config.listener.max_connections,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self, bound_port: Option<u16>) -> Router {
        let state = AppState {
            pipeline: Arc::clone(&self.pipeline),
            bound_port,
        };
        Router::new()
            .route("/{*path}", any(serve_request))
            .route("/", any(serve_request))
            .with_state(state)
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(CatchPanicLayer::new())
            .layer(ConcurrencyLimitLayer::new(self.max_connections))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// Run until `shutdown` fires: serve `listener` and follow `port_events`.
    pub async fn run(
        self,
        listener: TcpListener,
        mut port_events: mpsc::UnboundedReceiver<PortEvent>,
        shutdown: &Shutdown,
    ) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let main = {
            let app = self.router(None).into_make_service_with_connect_info::<SocketAddr>();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await
            })
        };

        let mut ports: HashMap<u16, oneshot::Sender<()>> = HashMap::new();
        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                event = port_events.recv() => match event {
                    Some(PortEvent::Bind { port, app }) => {
                        match self.open_port(addr.ip(), port, shutdown).await {
                            Ok(close) => {
                                tracing::info!(port, app = %app, "application port listening");
                                ports.insert(port, close);
                            }
                            Err(e) => {
                                tracing::error!(port, app = %app, error = %e, "cannot listen on application port");
                            }
                        }
                    }
                    Some(PortEvent::Unbind { port }) => {
                        if let Some(close) = ports.remove(&port) {
                            let _ = close.send(());
                            tracing::info!(port, "application port closed");
                        }
                    }
                    None => {
                        let _ = stop.recv().await;
                        break;
                    }
                },
                _ = stop.recv() => break,
            }
        }

        for (_, close) in ports.drain() {
            let _ = close.send(());
        }
        main.await.map_err(io::Error::other)??;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Listen on `port` for one application. The listener stops when the
    /// returned sender fires or on global shutdown.
    async fn open_port(&self, ip: IpAddr, port: u16, shutdown: &Shutdown) -> io::Result<oneshot::Sender<()>> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let app = self.router(Some(port)).into_make_service_with_connect_info::<SocketAddr>();
        let (close, closed) = oneshot::channel::<()>();
        let mut global = shutdown.subscribe();

        tokio::spawn(async move {
            let stop = async move {
                tokio::select! {
                    _ = closed => {}
                    _ = global.recv() => {}
                }
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
                tracing::error!(port, error = %e, "application listener failed");
            }
        });
        Ok(close)
    }
}

/// Catch-all handler: everything goes through the content pipeline.
async fn serve_request(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    tracing::debug!(request_id = %request.request_id(), "serving request");

    let (parts, _body) = request.into_parts();
    let incoming = IncomingRequest::from_parts(&parts.uri, parts.headers, peer, state.bound_port);
    state.pipeline.handle(incoming).await
}
