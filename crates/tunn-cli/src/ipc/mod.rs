//! Control socket client for talking to a running daemon

mod client;

pub use client::{ClientError, ControlClient};

pub use tunn_core::ipc::{ControlCommand, ControlResponse};
