//! Daemon and foreground run loops

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use tunn_core::pidfile::ArtifactGuard;
use tunn_core::{DaemonPaths, TunnelSpec};

use crate::ipc::ControlServer;
use crate::shutdown::{ShutdownCoordinator, ShutdownToken, StopCause};
use crate::state::StatusStore;
use crate::tunnel::{
    ListenerProbe, LsofProber, SshExecutor, StatusCallback, TunnelError, TunnelExecutor,
    TunnelManager,
};

/// External capabilities a run depends on
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn TunnelExecutor>,
    pub probe: Arc<dyn ListenerProbe>,
}

impl Collaborators {
    /// System `ssh` and `lsof`
    pub fn system() -> Self {
        Self {
            executor: Arc::new(SshExecutor::new()),
            probe: Arc::new(LsofProber::new()),
        }
    }
}

/// Run as the detached daemon until stopped
///
/// Serves the control socket at `paths.socket_file` while the tunnels run.
/// The PID and socket files are removed on the way out. Only a fatal internal
/// failure yields an error; tunnel failures are logged and the daemon keeps
/// answering `status` until it is stopped.
pub async fn run_daemon(
    paths: DaemonPaths,
    tunnels: BTreeMap<String, TunnelSpec>,
    collaborators: Collaborators,
) -> Result<()> {
    let pid = std::process::id();
    tracing::info!("tunn daemon starting (pid {})", pid);

    let store = Arc::new(StatusStore::new());
    for (name, spec) in &tunnels {
        store.ensure_tunnel(name, &spec.ports);
    }

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.listen_for_signals()?;
    let token = coordinator.token();

    let server = Arc::new(ControlServer::new(
        paths.socket_file.clone(),
        Arc::clone(&store),
        pid,
        token.clone(),
    ));
    let listener = server.bind()?;
    // A refused bind means the files belong to another daemon; only claim them once bound
    let guard = ArtifactGuard::new(paths.clone());

    let mut server_task = tokio::spawn({
        let server = Arc::clone(&server);
        async move { server.serve(listener).await }
    });

    let manager =
        TunnelManager::new(collaborators.executor, collaborators.probe, store.reporter());
    let mut manager_task = tokio::spawn({
        let token = token.clone();
        async move { manager.run_tunnels(&token, tunnels).await }
    });

    let mut manager_done = false;
    let mut server_done = false;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            joined = &mut manager_task, if !manager_done => {
                manager_done = true;
                match joined {
                    Ok(Ok(_)) => tracing::info!("All tunnels finished; still serving status"),
                    Ok(Err(e)) => {
                        tracing::error!("Tunnels finished with error: {}; still serving status", e)
                    }
                    Err(e) => tracing::error!("Tunnel manager task failed: {}", e),
                }
            }
            joined = &mut server_task, if !server_done => {
                server_done = true;
                let message = match joined {
                    Ok(Ok(())) => "control socket closed unexpectedly".to_string(),
                    Ok(Err(e)) => format!("control socket failed: {:#}", e),
                    Err(e) => format!("control socket task failed: {}", e),
                };
                tracing::error!("{}", message);
                token.trigger(StopCause::Failed(message));
            }
        }
    }

    let cause = token.cause().unwrap_or(StopCause::Cancelled);
    tracing::info!("Shutting down: {}", cause);

    server.close();
    if !server_done {
        if let Err(e) = server_task.await {
            tracing::warn!("Control socket task failed: {}", e);
        }
    }
    if !manager_done {
        match manager_task.await {
            Ok(Err(e)) => tracing::warn!("Tunnels finished with error: {}", e),
            Ok(Ok(_)) => {}
            Err(e) => tracing::warn!("Tunnel manager task failed: {}", e),
        }
    }

    coordinator.finish();
    guard.release();
    tracing::info!("tunn daemon stopped");

    if cause.is_fatal() {
        return Err(anyhow!("{}", cause));
    }
    Ok(())
}

/// Run tunnels attached to the terminal until they finish or a signal arrives
///
/// Returns the first tunnel error, or the cause that ended the run.
pub async fn run_foreground(
    tunnels: BTreeMap<String, TunnelSpec>,
    collaborators: Collaborators,
    on_status: StatusCallback,
    token: ShutdownToken,
) -> Result<Option<StopCause>, TunnelError> {
    let manager = TunnelManager::new(collaborators.executor, collaborators.probe, on_status);
    manager.run_tunnels(&token, tunnels).await
}
