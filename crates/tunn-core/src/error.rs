//! Core error types for tunn

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("~/.tunnrc not found. Please create one!")]
    NotFound(PathBuf),

    /// Config file exists but could not be read
    #[error("failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    /// YAML parse error
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Home directory could not be determined
    #[error("failed to get home directory")]
    NoHomeDir,

    /// Configuration defines no tunnels at all
    #[error("no tunnels defined in configuration")]
    NoTunnels,

    /// None of the requested tunnel names exist
    #[error("no tunnels found matching: {0:?}")]
    NoMatch(Vec<String>),
}

/// Port mapping parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    #[error("empty port mapping")]
    Empty,

    #[error("invalid local port {0:?}")]
    InvalidLocalPort(String),

    #[error("invalid remote port {0:?}")]
    InvalidRemotePort(String),
}
