//! Test doubles shared by the daemon integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use tunn_core::{PortState, TunnelSpec};
use tunn_daemon::tunnel::{
    parse_mappings, ListenerProbe, ProbeError, ProcessInfo, SshExecutor, StatusCallback,
    TunnelExecutor,
};
use tunn_daemon::{ShutdownToken, TunnelError};

/// Records every invocation and holds the tunnel up until cancelled
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    finished: Mutex<Vec<String>>,
    failing: Vec<String>,
}

impl RecordingExecutor {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Tunnels that ran until cancellation and then returned
    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl TunnelExecutor for RecordingExecutor {
    async fn execute(
        &self,
        token: &ShutdownToken,
        name: &str,
        spec: &TunnelSpec,
        on_status: StatusCallback,
    ) -> Result<(), TunnelError> {
        let mappings = parse_mappings(name, spec)?;
        self.calls.lock().unwrap().push((
            name.to_string(),
            SshExecutor::command_args(spec, &mappings),
        ));

        for port in &spec.ports {
            on_status(name, port, PortState::Connecting);
        }
        if self.failing.iter().any(|n| n == name) {
            for port in &spec.ports {
                on_status(name, port, PortState::error("connection refused"));
            }
            return Err(TunnelError::Executor {
                tunnel: name.to_string(),
                message: "connection refused".to_string(),
            });
        }
        for port in &spec.ports {
            on_status(name, port, PortState::Active);
        }

        token.cancelled().await;

        for port in &spec.ports {
            on_status(name, port, PortState::Stopping);
        }
        self.finished.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// Reports fixed listeners per port
#[derive(Default)]
pub struct FixedProbe {
    pub listeners: HashMap<u16, ProcessInfo>,
    pub fail: bool,
}

impl FixedProbe {
    pub fn with_listener(port: u16, command: &str, pid: u32) -> Self {
        let mut probe = Self::default();
        probe.listeners.insert(
            port,
            ProcessInfo {
                command: command.to_string(),
                pid,
            },
        );
        probe
    }
}

#[async_trait]
impl ListenerProbe for FixedProbe {
    async fn find_listener(&self, port: u16) -> Result<Option<ProcessInfo>, ProbeError> {
        if self.fail {
            return Err(ProbeError::Failed {
                port,
                message: "permission denied".to_string(),
            });
        }
        Ok(self.listeners.get(&port).cloned())
    }
}
