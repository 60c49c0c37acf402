//! Tunnel execution
//!
//! A [`TunnelExecutor`] keeps one tunnel up until the shutdown token fires or
//! the underlying process dies. [`SshExecutor`] runs a single `ssh -N`
//! process per tunnel carrying every configured forward.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};

use tunn_core::config::expand_home;
use tunn_core::{PortMapping, PortState, TunnelSpec};

use super::{parse_mappings, report_all, StatusCallback, TunnelError};
use crate::shutdown::ShutdownToken;

/// How long `ssh` must stay up before its forwards count as active
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1500);

/// How long to wait for stderr to drain after `ssh` exited
const STDERR_DRAIN: Duration = Duration::from_secs(1);

/// Runs one tunnel
#[async_trait]
pub trait TunnelExecutor: Send + Sync {
    /// Block until `token` is cancelled or the tunnel fails
    ///
    /// Port transitions are reported through `on_status` as
    /// `(tunnel, port key, state)`. Returns `Ok` after a cancellation-driven
    /// stop.
    async fn execute(
        &self,
        token: &ShutdownToken,
        name: &str,
        spec: &TunnelSpec,
        on_status: StatusCallback,
    ) -> Result<(), TunnelError>;
}

/// [`TunnelExecutor`] spawning the system `ssh` client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    program: String,
    settle: Duration,
}

impl SshExecutor {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            settle: DEFAULT_SETTLE,
        }
    }

    /// Use a different client binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::new()
        }
    }

    /// Override the settle period
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Full `ssh` argument list for a tunnel
    pub fn command_args(spec: &TunnelSpec, mappings: &[PortMapping]) -> Vec<String> {
        let mut args: Vec<String> = [
            "-N",
            "-o",
            "ExitOnForwardFailure=yes",
            "-o",
            "ServerAliveInterval=30",
            "-o",
            "ServerAliveCountMax=3",
            "-o",
            "BatchMode=yes",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if let Some(user) = &spec.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        if let Some(identity) = &spec.identity_file {
            args.push("-i".to_string());
            args.push(expand_home(identity).to_string_lossy().into_owned());
        }
        for mapping in mappings {
            args.push("-L".to_string());
            args.push(mapping.forward_spec());
        }
        args.push(spec.host.clone());
        args
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TunnelExecutor for SshExecutor {
    async fn execute(
        &self,
        token: &ShutdownToken,
        name: &str,
        spec: &TunnelSpec,
        on_status: StatusCallback,
    ) -> Result<(), TunnelError> {
        let mappings = parse_mappings(name, spec)?;
        let args = Self::command_args(spec, &mappings);

        report_all(&on_status, name, spec, PortState::Connecting);
        tracing::info!(
            tunnel = name,
            host = %spec.host,
            "Starting {} with {} forward(s)",
            self.program,
            mappings.len()
        );

        let mut child = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start {}: {}", self.program, e);
                report_all(&on_status, name, spec, PortState::error(message.clone()));
                return Err(TunnelError::Executor {
                    tunnel: name.to_string(),
                    message,
                });
            }
        };

        let mut stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(last_stderr_line(name.to_string(), stderr)));

        let settle = tokio::time::sleep(self.settle);
        tokio::pin!(settle);
        let mut settled = false;

        let status = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    report_all(&on_status, name, spec, PortState::Stopping);
                    if let Err(e) = child.kill().await {
                        tracing::warn!(tunnel = name, "Failed to kill {}: {}", self.program, e);
                    }
                    if let Some(task) = stderr_task.take() {
                        task.abort();
                    }
                    tracing::info!(tunnel = name, "Tunnel stopped");
                    return Ok(());
                }
                status = child.wait() => break status,
                _ = &mut settle, if !settled => {
                    settled = true;
                    report_all(&on_status, name, spec, PortState::Active);
                    tracing::info!(tunnel = name, "Tunnel active");
                }
            }
        };

        let last_line = match stderr_task.as_mut() {
            Some(task) => match tokio::time::timeout(STDERR_DRAIN, task).await {
                Ok(Ok(line)) => line,
                _ => None,
            },
            None => None,
        };
        if let Some(task) = stderr_task {
            task.abort();
        }

        let message = match (last_line, status) {
            (Some(line), _) => line,
            (None, Ok(status)) => format!("{} exited with {}", self.program, status),
            (None, Err(e)) => format!("failed to wait for {}: {}", self.program, e),
        };
        tracing::warn!(tunnel = name, "Tunnel failed: {}", message);
        report_all(&on_status, name, spec, PortState::error(message.clone()));

        Err(TunnelError::Executor {
            tunnel: name.to_string(),
            message,
        })
    }
}

/// Last non-empty line the process wrote to stderr
async fn last_stderr_line(tunnel: String, stderr: ChildStderr) -> Option<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(tunnel = %tunnel, "ssh: {}", line);
        last = Some(line.to_string());
    }
    last
}
