//! Unix socket control server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::app::Registry;
use crate::control::command::{handle_line, ControlError};
use crate::lifecycle::Shutdown;

/// Answers control requests, one JSON reply line per request line.
#[derive(Clone)]
pub struct ControlServer {
    socket_path: PathBuf,
    registry: Arc<Registry>,
    started: Instant,
}

impl ControlServer {
    pub fn new(socket_path: &Path, registry: Arc<Registry>) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
            registry,
            started: Instant::now(),
        }
    }

    /// Accept connections until shutdown. A stale socket file is replaced.
    #[cfg(unix)]
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), ControlError> {
        use tokio::net::UnixListener;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(socket = %self.socket_path.display(), "control server listening");

        let mut stop = shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.serve_connection(stream).await {
                                tracing::debug!(error = %e, "control connection closed with error");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(error = %e, "control accept failed"),
                },
                _ = stop.recv() => break,
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        tracing::info!("control server stopped");
        Ok(())
    }

    #[cfg(not(unix))]
    pub async fn run(self, _shutdown: &Shutdown) -> Result<(), ControlError> {
        tracing::warn!("control socket is only available on unix");
        Ok(())
    }

    /// Read request lines from `stream` and write one reply line for each.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<(), ControlError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let reply = handle_line(&self.registry, &line, self.started);
            let mut encoded = serde_json::to_string(&reply)?;
            encoded.push('\n');
            writer.write_all(encoded.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::command::Reply;

    #[tokio::test]
    async fn test_serve_connection_over_duplex() {
        let server = ControlServer::new(Path::new("/unused.sock"), Arc::new(Registry::default()));
        let (client, remote) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { server.serve_connection(remote).await });

        let (reader, mut writer) = tokio::io::split(client);
        writer.write_all(b"1 list\n\n2 nope\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut lines = BufReader::new(reader).lines();
        let first: Reply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(first.data, serde_json::json!([]));
        let second: Reply = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second.error.as_deref(), Some("unknown command 'nope'"));

        drop(lines);
        task.await.unwrap().unwrap();
    }
}
