//! Port conflict detection
//!
//! Before a tunnel starts, every local port it wants is checked for an
//! existing listener. The probe itself is behind [`ListenerProbe`] so the
//! orchestrator can be exercised without touching the host.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::ProbeError;

/// A process found listening on a local port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub command: String,
    pub pid: u32,
}

/// Answers "who is listening on this local TCP port"
#[async_trait]
pub trait ListenerProbe: Send + Sync {
    /// `Ok(None)` when nothing listens on `port`
    async fn find_listener(&self, port: u16) -> Result<Option<ProcessInfo>, ProbeError>;
}

/// [`ListenerProbe`] backed by `lsof`
#[derive(Debug, Clone)]
pub struct LsofProber {
    program: String,
}

impl LsofProber {
    pub fn new() -> Self {
        Self {
            program: "lsof".to_string(),
        }
    }

    /// Use a different `lsof` binary
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for LsofProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListenerProbe for LsofProber {
    async fn find_listener(&self, port: u16) -> Result<Option<ProcessInfo>, ProbeError> {
        let output = Command::new(&self.program)
            .arg("-nP")
            .arg(format!("-iTCP:{}", port))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    ProbeError::Unavailable(e)
                } else {
                    ProbeError::Failed {
                        port,
                        message: e.to_string(),
                    }
                }
            })?;

        if !output.status.success() {
            // lsof exits 1 when no file matched the selection
            if output.status.code() == Some(1) {
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(ProbeError::Failed { port, message });
        }

        parse_lsof_output(port, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Extract the first listener from `lsof` output
///
/// The first line is the column header; `COMMAND` and `PID` are the first two
/// columns of every data row.
pub fn parse_lsof_output(port: u16, output: &str) -> Result<Option<ProcessInfo>, ProbeError> {
    let mut rows = output.lines().filter(|line| !line.trim().is_empty());
    if rows.next().is_none() {
        return Ok(None);
    }

    let mut saw_row = false;
    for row in rows {
        saw_row = true;
        let mut fields = row.split_whitespace();
        let (Some(command), Some(pid)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(pid) = pid.parse::<u32>() else {
            continue;
        };
        return Ok(Some(ProcessInfo {
            command: command.to_string(),
            pid,
        }));
    }

    if saw_row {
        Err(ProbeError::Unparseable { port })
    } else {
        Ok(None)
    }
}
