//! Shared utilities for integration testing.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;

use sitehost::app::{PortEvent, RegistrySettings};
use sitehost::config::ServerConfig;
use sitehost::content::PipelineSettings;
use sitehost::{HttpServer, Pipeline, Registry, Shutdown};

/// A temporary applications directory.
pub struct Sites {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Sites {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// Create application `id` with `manifest` as its `app.conf`.
    pub fn app(&self, id: &str, manifest: &str) -> PathBuf {
        let root = self.dir.path().join(id);
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("app.conf"), manifest).unwrap();
        root
    }

    /// Write `content` to `relative` inside application `id`.
    pub fn write(&self, id: &str, relative: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(id).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    pub fn directories(&self) -> Vec<PathBuf> {
        vec![self.dir.path().to_path_buf()]
    }
}

/// Push the modification time of `path` forward so it reads as changed.
#[allow(dead_code)]
pub fn bump_mtime(path: &Path, seconds: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(seconds))
        .unwrap();
}

/// Registry over `sites`, with default settings.
#[allow(dead_code)]
pub fn registry(sites: &Sites) -> Arc<Registry> {
    let registry = Arc::new(Registry::new(RegistrySettings::default()));
    registry.discover(&sites.directories());
    registry
}

/// Registry that reports port bindings on the returned channel.
#[allow(dead_code)]
pub fn registry_with_ports(sites: &Sites) -> (Arc<Registry>, mpsc::UnboundedReceiver<PortEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = Arc::new(Registry::new(RegistrySettings::default()).with_port_events(tx));
    registry.discover(&sites.directories());
    (registry, rx)
}

#[allow(dead_code)]
pub fn pipeline(registry: &Arc<Registry>) -> Pipeline {
    Pipeline::new(Arc::clone(registry), PipelineSettings::default())
}

/// Full router stack around `pipeline`, for requests without a socket.
#[allow(dead_code)]
pub fn router(pipeline: Pipeline) -> Router {
    HttpServer::new(Arc::new(pipeline), &ServerConfig::default()).router(None)
}

#[allow(dead_code)]
pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

#[allow(dead_code)]
pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[allow(dead_code)]
pub async fn body_string(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Serve `pipeline` on an ephemeral local port until `shutdown` fires.
#[allow(dead_code)]
pub async fn start_server(
    pipeline: Pipeline,
    port_events: mpsc::UnboundedReceiver<PortEvent>,
    shutdown: Arc<Shutdown>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(Arc::new(pipeline), &ServerConfig::default());

    tokio::spawn(async move {
        if let Err(e) = server.run(listener, port_events, &shutdown).await {
            eprintln!("test server failed: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    addr
}

/// Client that never goes through a system proxy and never reuses connections.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// A free local port, released before returning.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
