//! Control socket client
//!
//! Every request opens a fresh connection: one request line out, one
//! response line back, bounded by a deadline covering the whole exchange.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use tunn_core::ipc::{encode_line, ControlCommand, ControlRequest, ControlResponse};

/// Errors talking to the daemon
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to daemon socket: {0}")]
    Unreachable(#[source] io::Error),

    #[error("daemon did not respond within {0:?}")]
    Timeout(Duration),

    #[error("control socket i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode daemon response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("daemon closed the connection without responding")]
    NoResponse,
}

/// Client for the daemon's control socket
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Ask for a status snapshot
    pub async fn status(&self, deadline: Duration) -> Result<ControlResponse, ClientError> {
        self.request(ControlCommand::Status, deadline).await
    }

    /// Ask the daemon to shut down
    pub async fn stop(&self, deadline: Duration) -> Result<ControlResponse, ClientError> {
        self.request(ControlCommand::Stop, deadline).await
    }

    /// Send one command and wait for its response
    pub async fn request(
        &self,
        command: ControlCommand,
        deadline: Duration,
    ) -> Result<ControlResponse, ClientError> {
        tokio::time::timeout(deadline, self.exchange(command))
            .await
            .map_err(|_| ClientError::Timeout(deadline))?
    }

    async fn exchange(&self, command: ControlCommand) -> Result<ControlResponse, ClientError> {
        tracing::debug!("Sending {} to {:?}", command, self.socket_path);

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(ClientError::Unreachable)?;
        let (reader, mut writer) = stream.into_split();

        let request = encode_line(&ControlRequest::new(command))?;
        writer.write_all(request.as_bytes()).await?;
        writer.flush().await?;

        let mut line = String::new();
        let read = BufReader::new(reader).read_line(&mut line).await?;
        if read == 0 {
            return Err(ClientError::NoResponse);
        }

        Ok(serde_json::from_str(line.trim())?)
    }
}
