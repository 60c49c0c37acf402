//! tunn-daemon: tunnel orchestration and the daemon's control plane
//!
//! Runs the configured SSH tunnels concurrently, guards their local ports
//! against existing listeners, keeps a shared status table and answers
//! `status` and `stop` requests on a unix-domain socket.

pub mod daemon;
pub mod ipc;
pub mod shutdown;
pub mod state;
pub mod tunnel;

pub use daemon::{run_daemon, run_foreground, Collaborators};
pub use ipc::ControlServer;
pub use shutdown::{ShutdownCoordinator, ShutdownToken, StopCause};
pub use state::StatusStore;
pub use tunnel::{TunnelError, TunnelManager};
