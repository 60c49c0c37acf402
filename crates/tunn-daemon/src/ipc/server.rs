//! Control socket server
//!
//! Listens on the daemon's unix-domain socket. Each connection carries one
//! request line and gets at most one response line.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use tunn_core::ipc::{encode_line, ControlCommand, ControlRequest, ControlResponse};

use crate::shutdown::{ShutdownToken, StopCause};
use crate::state::StatusStore;

/// How long a client may take to send its request line
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest request line read from a client
pub const MAX_REQUEST_BYTES: u64 = 64 * 1024;

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Control plane server
pub struct ControlServer {
    socket_path: PathBuf,
    store: Arc<StatusStore>,
    pid: u32,
    shutdown: ShutdownToken,
    closed: CancellationToken,
}

impl ControlServer {
    /// Create a server answering for daemon `pid`
    ///
    /// A `stop` request triggers `shutdown` with [`StopCause::StopRequested`]
    /// after the acknowledgment has been written.
    pub fn new(
        socket_path: impl Into<PathBuf>,
        store: Arc<StatusStore>,
        pid: u32,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            store,
            pid,
            shutdown,
            closed: CancellationToken::new(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing any leftover socket file
    ///
    /// Fails if the existing socket still accepts connections. The socket is
    /// restricted to the owner.
    pub fn bind(&self) -> Result<UnixListener> {
        if std::os::unix::net::UnixStream::connect(&self.socket_path).is_ok() {
            anyhow::bail!(
                "control socket {:?} is in use by another daemon",
                self.socket_path
            );
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {
                tracing::debug!("Removed leftover control socket {:?}", self.socket_path)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove old socket {:?}", self.socket_path)
                })
            }
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind control socket {:?}", self.socket_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict {:?}", self.socket_path))?;
        }

        tracing::info!("Control socket listening on {:?}", self.socket_path);
        Ok(listener)
    }

    /// Bind and serve until shutdown or [`ControlServer::close`]
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.closed.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let store = Arc::clone(&self.store);
                        let shutdown = self.shutdown.clone();
                        let pid = self.pid;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, store, pid, shutdown).await {
                                tracing::debug!("Control connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept control connection: {}", e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        tracing::debug!("Control socket closed");
        Ok(())
    }

    /// Stop accepting connections; safe to call more than once
    pub fn close(&self) {
        self.closed.cancel();
    }
}

/// Serve one request
///
/// Undecodable requests, including unknown commands and lines longer than
/// [`MAX_REQUEST_BYTES`], are dropped without a reply.
async fn handle_connection(
    stream: UnixStream,
    store: Arc<StatusStore>,
    pid: u32,
    shutdown: ShutdownToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut line = String::new();

    let read = tokio::time::timeout(REQUEST_READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("Timed out waiting for request")??;
    if read == 0 {
        return Ok(());
    }
    if !line.ends_with('\n') && read as u64 >= MAX_REQUEST_BYTES {
        tracing::debug!("Dropping oversized control request");
        return Ok(());
    }

    let request: ControlRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!("Dropping malformed control request: {}", e);
            return Ok(());
        }
    };

    tracing::debug!("Control request: {}", request.command);

    let response = match request.command {
        ControlCommand::Status => ControlResponse::status(pid, store.snapshot()),
        ControlCommand::Stop => ControlResponse::stopping(pid, store.snapshot()),
    };

    writer.write_all(encode_line(&response)?.as_bytes()).await?;
    writer.flush().await?;

    if request.command == ControlCommand::Stop {
        writer.shutdown().await.ok();
        tracing::info!("Stop requested over control socket");
        shutdown.trigger(StopCause::StopRequested);
    }

    Ok(())
}
