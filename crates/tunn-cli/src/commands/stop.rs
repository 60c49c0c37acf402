//! Stop command implementation

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::time::Instant;

use tunn_core::ipc::STOPPING_MESSAGE;
use tunn_core::pidfile::check_running;
use tunn_core::DaemonPaths;

use super::status::STATUS_DEADLINE;
use crate::ipc::ControlClient;

pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const STOP_WAIT: Duration = Duration::from_secs(5);

/// Execute the stop command
pub async fn stop_command(paths: &DaemonPaths) -> Result<()> {
    let Some(pid) = check_running(paths)? else {
        println!("tunn daemon not running");
        return Ok(());
    };

    let response = ControlClient::new(&paths.socket_file)
        .stop(STATUS_DEADLINE)
        .await
        .context("failed to send stop command")?;

    let mut line = format!("stopping... (pid {})", pid);
    if let Some(message) = response.message.as_deref() {
        if !message.is_empty() && message != STOPPING_MESSAGE {
            line.push_str(&format!(" ({})", message));
        }
    }
    println!("{}", line);

    let deadline = Instant::now() + STOP_WAIT;
    while Instant::now() < deadline {
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
        if check_running(paths)?.is_none() {
            println!("tunn daemon stopped");
            return Ok(());
        }
    }

    println!("tunn daemon is still stopping; run 'tunn status' to check on it");
    Ok(())
}
