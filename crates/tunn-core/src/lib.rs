//! tunn-core: Shared types and daemon plumbing for tunn
//!
//! This crate provides the configuration model, the control-plane wire
//! types, the daemon's filesystem anchors and PID file handling used by both
//! the daemon and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod paths;
pub mod pidfile;
pub mod types;

pub use config::{Config, TunnelSpec};
pub use error::{ConfigError, MappingError};
pub use paths::DaemonPaths;
pub use types::{PortMapping, PortState, TunnelStatus};

/// Version string reported by `tunn version`
pub fn version() -> &'static str {
    option_env!("TUNN_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}
