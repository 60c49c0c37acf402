//! CLI command implementations

mod start;
mod status;
mod stop;
mod version;

pub use start::{run_daemon_command, start_command};
pub use status::status_command;
pub use stop::stop_command;
pub use version::version_command;
