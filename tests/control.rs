//! Control channel tests over a real unix socket.
#![cfg(unix)]

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use common::{get, pipeline, registry, router, send, Sites};
use sitehost::control::{ControlServer, Reply};
use sitehost::Shutdown;

async fn request(socket: &Path, line: &str) -> Reply {
    let stream = UnixStream::connect(socket).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
    writer.shutdown().await.unwrap();
    let line = BufReader::new(reader).lines().next_line().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_control_socket_manages_applications() {
    let sites = Sites::new();
    sites.app("blog", "server { domains: blog.test, www.blog.test }");
    sites.write("blog", "index.html", "blog home");
    let registry = registry(&sites);
    let router = router(pipeline(&registry));

    let socket_dir = tempfile::tempdir().unwrap();
    let socket = socket_dir.path().join("control.sock");
    let shutdown = Arc::new(Shutdown::new());
    let server = ControlServer::new(&socket, Arc::clone(&registry));
    let task = {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { server.run(&shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let list = request(&socket, "1 list").await;
    assert_eq!(list.id, "1");
    assert_eq!(list.data[0]["id"], "blog");

    let first = request(&socket, "2 getFirstDomain blog").await;
    assert_eq!(first.data, "blog.test");

    let disabled = request(&socket, "3 disable blog").await;
    assert_eq!(disabled.error, None);
    assert_eq!(
        send(&router, get("blog.test", "/")).await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );

    request(&socket, "4 enable blog").await;
    assert_eq!(send(&router, get("blog.test", "/")).await.status(), StatusCode::OK);

    let temp = request(&socket, "5 tempDomain blog").await;
    let domain = temp.data["domain"].as_str().unwrap().to_string();
    assert!(domain.ends_with(".preview.localhost"));
    assert_eq!(send(&router, get(&domain, "/")).await.status(), StatusCode::OK);

    let unknown = request(&socket, "6 enable nobody").await;
    assert!(unknown.error.is_some());

    shutdown.trigger();
    task.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_reload_command_picks_up_manifest_change() {
    let sites = Sites::new();
    let root = sites.app("shop", "server { domains: shop.test }");
    sites.write("shop", "index.html", "shop");
    let registry = registry(&sites);
    let router = router(pipeline(&registry));

    let socket_dir = tempfile::tempdir().unwrap();
    let socket = socket_dir.path().join("control.sock");
    let shutdown = Arc::new(Shutdown::new());
    let server = ControlServer::new(&socket, Arc::clone(&registry));
    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move { server.run(&shutdown).await });
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    std::fs::write(root.join("app.conf"), "server { domains: store.test }").unwrap();
    common::bump_mtime(&root.join("app.conf"), 5);

    let reply = request(&socket, "7 reload:shop").await;
    assert_eq!(reply.data["changed"], true);
    assert_eq!(send(&router, get("store.test", "/")).await.status(), StatusCode::OK);
    assert_eq!(send(&router, get("shop.test", "/")).await.status(), StatusCode::NOT_FOUND);

    shutdown.trigger();
}
