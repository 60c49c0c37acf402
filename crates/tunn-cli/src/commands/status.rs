//! Status command implementation

use std::io::IsTerminal;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use tunn_core::pidfile::check_running;
use tunn_core::DaemonPaths;

use crate::ipc::ControlClient;
use crate::output::{format_status, print_status};

/// Deadline for the status query
pub const STATUS_DEADLINE: Duration = Duration::from_secs(2);

/// Execute the status command
pub async fn status_command(paths: &DaemonPaths) -> Result<()> {
    let client = ControlClient::new(&paths.socket_file);

    let response = match client.status(STATUS_DEADLINE).await {
        Ok(response) => response,
        Err(e) => {
            // An unreachable socket only means "not running" once the PID file agrees
            match check_running(paths).context("failed to check daemon status")? {
                Some(pid) => bail!("daemon (pid {}) is unreachable: {}", pid, e),
                None => {
                    println!("tunn daemon not running");
                    return Ok(());
                }
            }
        }
    };

    if std::io::stdout().is_terminal() {
        print_status(&response);
    } else {
        print!("{}", format_status(&response));
    }
    Ok(())
}
