//! Tunnel orchestration
//!
//! - [`guard`]: finds processes already listening on a local port
//! - [`executor`]: runs one tunnel until cancelled
//! - [`manager`]: runs every selected tunnel concurrently

pub mod executor;
pub mod guard;
pub mod manager;

use std::sync::Arc;

use thiserror::Error;
use tunn_core::{MappingError, PortMapping, PortState, TunnelSpec};

pub use executor::{SshExecutor, TunnelExecutor};
pub use guard::{ListenerProbe, LsofProber, ProcessInfo};
pub use manager::TunnelManager;

/// Receives `(tunnel, port key, state)` for every port state change
pub type StatusCallback = Arc<dyn Fn(&str, &str, PortState) + Send + Sync>;

/// Errors that end a single tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("tunnel {tunnel}: invalid port mapping {mapping:?}: {source}")]
    InvalidMapping {
        tunnel: String,
        mapping: String,
        #[source]
        source: MappingError,
    },

    #[error("port {port} is being used by \"{command}\" (pid: {pid})")]
    PortConflict { port: u16, command: String, pid: u32 },

    #[error("tunnel {tunnel}: {source}")]
    Probe {
        tunnel: String,
        #[source]
        source: ProbeError,
    },

    #[error("tunnel {tunnel}: {message}")]
    Executor { tunnel: String, message: String },
}

/// Parse every configured mapping of a tunnel, in order
pub fn parse_mappings(name: &str, spec: &TunnelSpec) -> Result<Vec<PortMapping>, TunnelError> {
    spec.ports
        .iter()
        .map(|mapping| {
            PortMapping::parse(mapping).map_err(|source| TunnelError::InvalidMapping {
                tunnel: name.to_string(),
                mapping: mapping.clone(),
                source,
            })
        })
        .collect()
}

/// Report the same state for every port of a tunnel
pub(crate) fn report_all(
    on_status: &StatusCallback,
    name: &str,
    spec: &TunnelSpec,
    state: PortState,
) {
    for port in &spec.ports {
        on_status(name, port, state.clone());
    }
}

/// Errors from the port listener probe
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("lsof is not available: {0}")]
    Unavailable(#[source] std::io::Error),

    #[error("lsof failed for port {port}: {message}")]
    Failed { port: u16, message: String },

    #[error("unexpected lsof output for port {port}")]
    Unparseable { port: u16 },
}
