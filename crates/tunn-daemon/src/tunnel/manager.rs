//! Concurrent tunnel orchestration
//!
//! One task per tunnel. A tunnel's failure is recorded and logged but never
//! cancels its siblings; the first failure is kept and returned once every
//! task has finished.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use tunn_core::{PortState, TunnelSpec};

use super::guard::ListenerProbe;
use super::{parse_mappings, report_all, StatusCallback, TunnelError, TunnelExecutor};
use crate::shutdown::{ShutdownToken, StopCause};

/// Runs a set of tunnels through an executor, guarding their ports first
#[derive(Clone)]
pub struct TunnelManager {
    executor: Arc<dyn TunnelExecutor>,
    probe: Arc<dyn ListenerProbe>,
    on_status: StatusCallback,
}

impl TunnelManager {
    pub fn new(
        executor: Arc<dyn TunnelExecutor>,
        probe: Arc<dyn ListenerProbe>,
        on_status: StatusCallback,
    ) -> Self {
        Self {
            executor,
            probe,
            on_status,
        }
    }

    /// Run every tunnel until all of them have returned
    ///
    /// Returns the first tunnel error if there was one. Otherwise returns the
    /// token's stop cause, or `None` when every tunnel ended on its own.
    pub async fn run_tunnels(
        &self,
        token: &ShutdownToken,
        tunnels: BTreeMap<String, TunnelSpec>,
    ) -> Result<Option<StopCause>, TunnelError> {
        let (err_tx, mut err_rx) = mpsc::channel(tunnels.len().max(1));
        let mut tasks = JoinSet::new();

        for (name, spec) in tunnels {
            let manager = self.clone();
            let token = token.clone();
            let err_tx = err_tx.clone();
            tasks.spawn(async move {
                if let Err(e) = manager.run_tunnel(&token, &name, &spec).await {
                    tracing::error!(tunnel = %name, "Tunnel failed: {}", e);
                    // Only the first error is reported; a full slot means one is already kept
                    let _ = err_tx.try_send(e);
                }
            });
        }
        drop(err_tx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Tunnel task panicked: {}", e);
            }
        }

        match err_rx.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(token.cause()),
        }
    }

    /// Run a single tunnel: parse, guard its ports, then hand it to the executor
    pub async fn run_tunnel(
        &self,
        token: &ShutdownToken,
        name: &str,
        spec: &TunnelSpec,
    ) -> Result<(), TunnelError> {
        let mappings = match parse_mappings(name, spec) {
            Ok(mappings) => mappings,
            Err(e) => {
                report_all(&self.on_status, name, spec, PortState::error(e.to_string()));
                return Err(e);
            }
        };

        let mut conflicts = Vec::new();
        for (key, mapping) in spec.ports.iter().zip(&mappings) {
            match self.probe.find_listener(mapping.local).await {
                Ok(Some(process)) => {
                    let err = TunnelError::PortConflict {
                        port: mapping.local,
                        command: process.command,
                        pid: process.pid,
                    };
                    tracing::warn!(tunnel = name, port = mapping.local, "{}", err);
                    conflicts.push((key.as_str(), err));
                }
                Ok(None) => {}
                Err(source) => {
                    let err = TunnelError::Probe {
                        tunnel: name.to_string(),
                        source,
                    };
                    report_all(&self.on_status, name, spec, PortState::error(err.to_string()));
                    return Err(err);
                }
            }
        }

        if !conflicts.is_empty() {
            let first = conflicts[0].1.to_string();
            for key in &spec.ports {
                let message = conflicts
                    .iter()
                    .find(|(port, _)| *port == key.as_str())
                    .map(|(_, err)| err.to_string())
                    .unwrap_or_else(|| first.clone());
                (self.on_status)(name, key, PortState::error(message));
            }
            let (_, err) = conflicts.swap_remove(0);
            return Err(err);
        }

        if token.is_cancelled() {
            return Ok(());
        }

        self.executor
            .execute(token, name, spec, Arc::clone(&self.on_status))
            .await
    }
}
