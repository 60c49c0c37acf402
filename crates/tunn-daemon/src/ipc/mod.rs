//! Control plane
//!
//! Unix socket server that CLI invocations use to query or stop a running
//! daemon.

mod server;

pub use server::{ControlServer, MAX_REQUEST_BYTES, REQUEST_READ_TIMEOUT};
