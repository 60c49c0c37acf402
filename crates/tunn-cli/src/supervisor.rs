//! Daemon supervisor
//!
//! Launches the detached daemon by re-executing this binary with
//! `--internal-daemon`, then proves it healthy before returning: the
//! control socket must appear and answer `status` for the spawned PID.
//! Any failure kills the child and removes what it left behind.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use tunn_core::ipc::ControlResponse;
use tunn_core::pidfile::{
    check_running, cleanup, is_process_alive, read_pid_file, write_pid_file,
};
use tunn_core::{DaemonPaths, PortState};

use crate::ipc::{ClientError, ControlClient};
use crate::output::Display;

/// Hidden flag selecting daemon mode
pub const INTERNAL_DAEMON_FLAG: &str = "--internal-daemon";

pub const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(3);
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_millis(500);
pub const PREVIEW_DURATION: Duration = Duration::from_secs(2);
pub const PREVIEW_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Errors launching the daemon
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("tunn daemon already running (pid {0}); use 'tunn status' or stop it before relaunching")]
    AlreadyRunning(u32),

    #[error("failed to start daemon: {0}")]
    Spawn(#[source] io::Error),

    #[error("daemon failed to expose control socket within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("daemon failed to start: {0}")]
    HandshakeRejected(String),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl LaunchError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| LaunchError::Io { context, source }
    }
}

/// Spawns and verifies the background daemon
#[derive(Debug, Clone)]
pub struct Supervisor {
    paths: DaemonPaths,
    program: PathBuf,
    socket_timeout: Duration,
}

impl Supervisor {
    /// Supervisor re-executing the current binary
    pub fn new(paths: DaemonPaths) -> Result<Self, LaunchError> {
        let program =
            std::env::current_exe().map_err(LaunchError::io("failed to locate executable"))?;
        Ok(Self::with_program(paths, program))
    }

    pub fn with_program(paths: DaemonPaths, program: impl Into<PathBuf>) -> Self {
        Self {
            paths,
            program: program.into(),
            socket_timeout: SOCKET_TIMEOUT,
        }
    }

    /// Override how long to wait for the control socket
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn paths(&self) -> &DaemonPaths {
        &self.paths
    }

    /// Start the daemon for `names` and return its PID once it answers
    pub async fn launch(&self, names: &[String]) -> Result<u32, LaunchError> {
        if let Some(pid) =
            check_running(&self.paths).map_err(LaunchError::io("failed to check daemon status"))?
        {
            return Err(LaunchError::AlreadyRunning(pid));
        }

        self.paths
            .ensure_runtime_dir()
            .map_err(LaunchError::io("failed to create runtime directory"))?;

        let log = open_log(&self.paths.log_file)
            .map_err(LaunchError::io("failed to open daemon log"))?;
        // Earlier runs share the log; only lines past this offset belong to the new child
        let log_start = log
            .metadata()
            .map_err(LaunchError::io("failed to open daemon log"))?
            .len();
        let log_err = log
            .try_clone()
            .map_err(LaunchError::io("failed to open daemon log"))?;

        let mut command = Command::new(&self.program);
        command
            .arg(INTERNAL_DAEMON_FLAG)
            .args(names)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Keep terminal signals aimed at the launcher away from the daemon
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(LaunchError::Spawn)?;
        let pid = child.id();
        tracing::debug!(pid, "Spawned daemon");

        if let Err(e) = write_pid_file(&self.paths.pid_file, pid) {
            kill_child(&mut child);
            return Err(LaunchError::Io {
                context: "failed to write PID file",
                source: e,
            });
        }

        match self.handshake(&mut child, log_start).await {
            Ok(()) => {
                // The daemon outlives this process; it is never waited on
                drop(child);
                tracing::debug!(pid, "Daemon handshake complete");
                Ok(pid)
            }
            Err(e) => {
                tracing::debug!(pid, "Daemon handshake failed: {}", e);
                kill_child(&mut child);
                self.release_artifacts(pid).await;
                Err(e)
            }
        }
    }

    async fn handshake(&self, child: &mut Child, log_start: u64) -> Result<(), LaunchError> {
        let socket_deadline = Instant::now() + self.socket_timeout;
        while !self.paths.socket_file.exists() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(LaunchError::HandshakeRejected(
                    self.failure_detail(log_start, format!("daemon exited with {}", status)),
                ));
            }
            if Instant::now() >= socket_deadline {
                return Err(LaunchError::HandshakeTimeout(self.socket_timeout));
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }

        let client = ControlClient::new(&self.paths.socket_file);
        let status_deadline = Instant::now() + HANDSHAKE_DEADLINE;
        let response = loop {
            let remaining = status_deadline.saturating_duration_since(Instant::now());
            match client.status(remaining).await {
                // The socket file exists a moment before the daemon listens on it
                Err(ClientError::Unreachable(_))
                    if Instant::now() + SOCKET_POLL_INTERVAL < status_deadline =>
                {
                    tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(LaunchError::HandshakeRejected(
                        self.failure_detail(log_start, e.to_string()),
                    ))
                }
                Ok(response) => break response,
            }
        };

        if response.pid != child.id() {
            return Err(LaunchError::HandshakeRejected(format!(
                "control socket is served by another daemon (pid {})",
                response.pid
            )));
        }
        if !response.running {
            return Err(LaunchError::HandshakeRejected(
                self.failure_detail(log_start, "daemon reported it is not running".to_string()),
            ));
        }
        Ok(())
    }

    /// Last line the child logged when there is one, otherwise `fallback`
    fn failure_detail(&self, log_start: u64, fallback: String) -> String {
        match tail_log_message(&self.paths.log_file, log_start) {
            Ok(Some(line)) => line,
            _ => fallback,
        }
    }

    /// Remove the PID and socket files of a failed launch
    ///
    /// Files now owned by a competing daemon are left alone; a PID file still
    /// naming the killed child is handed to that daemon instead.
    async fn release_artifacts(&self, pid: u32) {
        if let Ok(Some(owner)) = read_pid_file(&self.paths.pid_file) {
            if owner != pid {
                return;
            }
        }

        let client = ControlClient::new(&self.paths.socket_file);
        if let Ok(response) = client.status(HANDSHAKE_DEADLINE).await {
            if response.running && response.pid != pid && is_process_alive(response.pid) {
                if let Err(e) = write_pid_file(&self.paths.pid_file, response.pid) {
                    tracing::warn!("Failed to restore PID file: {}", e);
                }
                return;
            }
        }

        cleanup(&self.paths);
    }
}

/// Open the daemon log for appending, owner-only
pub fn open_log(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Failed to kill daemon: {}", e);
    }
    let _ = child.wait();
}

/// Last non-empty line written to the daemon log at or after byte `start`
///
/// A leading `Error: ` is dropped so the line reads as a bare diagnostic. A
/// log shorter than `start` was truncated and is read from the beginning.
pub fn tail_log_message(path: &Path, start: u64) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let start = if file.metadata()?.len() < start { 0 } else { start };
    file.seek(SeekFrom::Start(start))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let contents = String::from_utf8_lossy(&bytes);
    Ok(contents
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(|line| line.strip_prefix("Error: ").unwrap_or(line).to_string()))
}

/// Remembers the last state shown per `tunnel|port`
#[derive(Debug, Default)]
pub struct SnapshotCache {
    seen: HashMap<String, PortState>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show the port states that changed since the previous snapshot
    ///
    /// Returns whether any port of the snapshot is in error.
    pub fn apply<W: Write>(
        &mut self,
        display: &mut Display<W>,
        response: &ControlResponse,
    ) -> bool {
        let mut tunnels: Vec<_> = response.tunnels.iter().collect();
        tunnels.sort_by(|a, b| a.name.cmp(&b.name));

        let mut has_error = false;
        for tunnel in tunnels {
            for (port, state) in &tunnel.ports {
                let key = format!("{}|{}", tunnel.name, port);
                if self.seen.get(&key) != Some(state) {
                    display.update(&tunnel.name, port, state.clone());
                    self.seen.insert(key, state.clone());
                }
                has_error |= state.is_error();
            }
        }
        has_error
    }
}

/// Watch the freshly started daemon for a short while
///
/// Returns `true` if any port reported an error. In an interactive terminal
/// the states are drawn live, and an error keeps the preview open until
/// Enter is pressed (or, without a terminal on stdin, for one more
/// `duration`).
pub async fn preview(
    client: &ControlClient,
    duration: Duration,
    interactive: bool,
) -> Result<bool, ClientError> {
    if duration.is_zero() {
        return Ok(false);
    }
    if interactive {
        return preview_live(client, duration).await;
    }

    let deadline = Instant::now() + duration;
    loop {
        let response = client.status(HANDSHAKE_DEADLINE).await?;
        if response.has_error() {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(PREVIEW_POLL_INTERVAL).await;
    }
}

async fn preview_live(client: &ControlClient, duration: Duration) -> Result<bool, ClientError> {
    let mut display = Display::stdout(true);
    let mut cache = SnapshotCache::new();
    let mut ticker = tokio::time::interval(PREVIEW_POLL_INTERVAL);
    let close_at = Instant::now() + duration;

    let mut saw_error = false;
    let mut acknowledged = None;
    let mut grace_until = None;

    let outcome = loop {
        ticker.tick().await;

        let response = match client.status(HANDSHAKE_DEADLINE).await {
            Ok(response) => response,
            Err(e) => break Err(e),
        };

        if cache.apply(&mut display, &response) && !saw_error {
            saw_error = true;
            if io::stdin().is_terminal() {
                display.set_footer(
                    "Errors detected while starting tunnels. Press Enter to exit preview.",
                );
                acknowledged = Some(tokio::task::spawn_blocking(|| {
                    let mut line = String::new();
                    let _ = io::stdin().read_line(&mut line);
                }));
            } else {
                display.set_footer("Errors detected while starting tunnels.");
                grace_until = Some(Instant::now() + duration);
            }
        }

        if saw_error {
            if let Some(handle) = &acknowledged {
                if handle.is_finished() {
                    break Ok(true);
                }
                continue;
            }
            if grace_until.map_or(true, |until| Instant::now() >= until) {
                break Ok(true);
            }
        } else if Instant::now() >= close_at {
            break Ok(false);
        }
    };

    display.set_footer("");
    display.clear();
    outcome
}
