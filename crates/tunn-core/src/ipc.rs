//! Control-plane protocol between CLI invocations and the daemon
//!
//! One JSON object per direction per connection, each terminated by a
//! newline, over the daemon's unix-domain socket. The client writes a
//! [`ControlRequest`], the daemon answers with one [`ControlResponse`] and
//! the connection is closed. Requests that fail to decode, including
//! unknown command tags, are dropped without a reply.

use serde::{Deserialize, Serialize};

use crate::types::TunnelStatus;

/// Mode reported by a detached daemon
pub const MODE_DAEMON: &str = "daemon";

/// Message sent with the `stop` acknowledgment
pub const STOPPING_MESSAGE: &str = "stopping";

/// Commands understood by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    /// Snapshot of all tunnel states
    Status,
    /// Acknowledge, then shut the daemon down
    Stop,
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlCommand::Status => write!(f, "status"),
            ControlCommand::Stop => write!(f, "stop"),
        }
    }
}

/// Request from a CLI invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub command: ControlCommand,
}

impl ControlRequest {
    pub fn new(command: ControlCommand) -> Self {
        Self { command }
    }
}

/// Daemon state returned for every recognized request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub running: bool,
    pub mode: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tunnels: Vec<TunnelStatus>,
}

impl ControlResponse {
    /// Response to `status`
    pub fn status(pid: u32, tunnels: Vec<TunnelStatus>) -> Self {
        Self {
            running: true,
            mode: MODE_DAEMON.to_string(),
            pid,
            message: None,
            tunnels,
        }
    }

    /// Response to `stop`
    pub fn stopping(pid: u32, tunnels: Vec<TunnelStatus>) -> Self {
        Self {
            running: false,
            mode: MODE_DAEMON.to_string(),
            pid,
            message: Some(STOPPING_MESSAGE.to_string()),
            tunnels,
        }
    }

    /// Whether any port of any tunnel reports an error
    pub fn has_error(&self) -> bool {
        self.tunnels.iter().any(TunnelStatus::has_error)
    }
}

/// Encode a message as a single newline-terminated JSON line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
