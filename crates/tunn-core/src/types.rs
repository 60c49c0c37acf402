//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::MappingError;

/// Lifecycle state of one port of one tunnel
///
/// On the wire and in the status table this is a plain string:
/// `pending`, `connecting`, `active`, `stopping` or `error - <detail>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PortState {
    /// Seeded, nothing has happened yet
    Pending,
    /// SSH process is being started
    Connecting,
    /// Forward is established
    Active,
    /// Shutdown in progress
    Stopping,
    /// Terminal failure for this run
    Error(String),
    /// A state string this build does not know about
    Unknown(String),
}

impl PortState {
    /// Build an error state from a detail message
    pub fn error(detail: impl Into<String>) -> Self {
        PortState::Error(detail.into())
    }

    /// Whether this is an error state
    pub fn is_error(&self) -> bool {
        matches!(self, PortState::Error(_))
    }

    /// Whether moving from `self` to `next` follows the port lifecycle
    ///
    /// `pending → connecting → active|error`, `active → stopping`; `error`
    /// is terminal. Re-reporting the same state is allowed.
    pub fn can_transition_to(&self, next: &PortState) -> bool {
        use PortState::*;
        if self == next {
            return true;
        }
        match (self, next) {
            (Error(_), _) => false,
            (Pending, Connecting) | (Pending, Error(_)) => true,
            (Connecting, Active) | (Connecting, Error(_)) | (Connecting, Stopping) => true,
            (Active, Stopping) | (Active, Error(_)) => true,
            (Unknown(_), _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortState::Pending => write!(f, "pending"),
            PortState::Connecting => write!(f, "connecting"),
            PortState::Active => write!(f, "active"),
            PortState::Stopping => write!(f, "stopping"),
            PortState::Error(detail) => write!(f, "error - {}", detail),
            PortState::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<String> for PortState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pending" => PortState::Pending,
            "connecting" => PortState::Connecting,
            "active" => PortState::Active,
            "stopping" => PortState::Stopping,
            "error" => PortState::Error(String::new()),
            _ => match raw.strip_prefix("error - ") {
                Some(detail) => PortState::Error(detail.to_string()),
                None => PortState::Unknown(raw),
            },
        }
    }
}

impl From<&str> for PortState {
    fn from(raw: &str) -> Self {
        PortState::from(raw.to_string())
    }
}

impl From<PortState> for String {
    fn from(state: PortState) -> Self {
        state.to_string()
    }
}

/// Point-in-time status of one tunnel, keyed by port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Ports", default)]
    pub ports: BTreeMap<String, PortState>,
}

impl TunnelStatus {
    /// Create an empty status for a tunnel
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Whether any port of this tunnel is in an error state
    pub fn has_error(&self) -> bool {
        self.ports.values().any(PortState::is_error)
    }
}

/// A parsed `[bind:]local[:remote]` port mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Bind address for the local side, if given
    pub bind: Option<String>,
    /// Local port
    pub local: u16,
    /// Remote port on the far side of the tunnel
    pub remote: u16,
}

impl PortMapping {
    /// Parse a mapping as written in the configuration
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MappingError::Empty);
        }

        let parts: Vec<&str> = text.split(':').map(str::trim).collect();
        let (bind, local, remote) = match parts.as_slice() {
            [local] => (None, *local, *local),
            [first, second] if first.parse::<u16>().is_ok() => (None, *first, *second),
            [bind, local] => (Some(*bind), *local, *local),
            [bind, local, remote] => (Some(*bind), *local, *remote),
            _ => return Err(MappingError::InvalidLocalPort(text.to_string())),
        };

        let local =
            parse_port(local).ok_or_else(|| MappingError::InvalidLocalPort(local.to_string()))?;
        let remote =
            parse_port(remote).ok_or_else(|| MappingError::InvalidRemotePort(remote.to_string()))?;

        Ok(Self {
            bind: bind.filter(|b| !b.is_empty()).map(str::to_string),
            local,
            remote,
        })
    }

    /// Render the `ssh -L` forward specification
    pub fn forward_spec(&self) -> String {
        match &self.bind {
            Some(bind) => format!("{}:{}:localhost:{}", bind, self.local, self.remote),
            None => format!("{}:localhost:{}", self.local, self.remote),
        }
    }
}

fn parse_port(text: &str) -> Option<u16> {
    match text.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}
