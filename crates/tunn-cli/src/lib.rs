//! tunn: keep named SSH port-forward tunnels alive
//!
//! Library half of the `tunn` binary: the control socket client, the daemon
//! supervisor, command implementations and terminal output.

pub mod commands;
pub mod ipc;
pub mod output;
pub mod supervisor;
