//! Start command implementation
//!
//! `tunn [names]` runs the selected tunnels attached to the terminal,
//! `tunn -d [names]` hands them to a background daemon.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};

use tunn_core::pidfile::check_running;
use tunn_core::{config, DaemonPaths, PortState, TunnelSpec};
use tunn_daemon::tunnel::StatusCallback;
use tunn_daemon::{run_daemon, run_foreground, Collaborators, ShutdownCoordinator, StopCause};

use crate::ipc::ControlClient;
use crate::output::{print_warning, Display};
use crate::supervisor::{preview, LaunchError, Supervisor, PREVIEW_DURATION};

/// Execute the start command
pub async fn start_command(paths: &DaemonPaths, names: &[String], detach: bool) -> Result<()> {
    if let Some(pid) = check_running(paths).context("failed to check daemon status")? {
        if detach {
            return Err(LaunchError::AlreadyRunning(pid).into());
        }
        bail!(
            "tunn daemon already running (pid {}); use 'tunn status' to inspect or stop it before launching in the foreground",
            pid
        );
    }

    let config = config::load()?;
    let tunnels = config.select(names)?;

    if detach {
        launch_detached(paths, names).await
    } else {
        run_attached(tunnels).await
    }
}

async fn launch_detached(paths: &DaemonPaths, names: &[String]) -> Result<()> {
    let supervisor = Supervisor::new(paths.clone())?;
    let pid = supervisor.launch(names).await?;

    let client = ControlClient::new(&paths.socket_file);
    let interactive = std::io::stdout().is_terminal();
    let errors = match preview(&client, PREVIEW_DURATION, interactive).await {
        Ok(errors) => errors,
        Err(e) => {
            print_warning(&format!("unable to preview daemon startup: {}", e));
            false
        }
    };

    println!("tunn daemon started (pid {})", pid);
    if errors {
        println!("Some tunnels reported errors during startup. Run 'tunn status' for details.");
    }
    Ok(())
}

async fn run_attached(tunnels: BTreeMap<String, TunnelSpec>) -> Result<()> {
    let display = Arc::new(Mutex::new(Display::stdout(std::io::stdout().is_terminal())));
    let on_status: StatusCallback = {
        let display = Arc::clone(&display);
        Arc::new(move |tunnel: &str, port: &str, state: PortState| {
            if let Ok(mut display) = display.lock() {
                display.update(tunnel, port, state);
            }
        })
    };

    let mut coordinator = ShutdownCoordinator::new();
    coordinator
        .listen_for_signals()
        .context("failed to install signal handlers")?;
    let token = coordinator.token();

    let notice = tokio::spawn({
        let token = token.clone();
        async move {
            token.cancelled().await;
            if matches!(token.cause(), Some(StopCause::Signal(_))) {
                println!("\nShutting down tunnels...");
            }
        }
    });

    let result = run_foreground(tunnels, Collaborators::system(), on_status, token).await;
    coordinator.finish();
    notice.abort();

    match result {
        Err(e) => Err(e.into()),
        Ok(Some(cause)) if cause.is_user_initiated() => {
            println!("Exiting...");
            Ok(())
        }
        Ok(_) => Ok(()),
    }
}

/// Body of the detached daemon process
pub async fn run_daemon_command(paths: DaemonPaths, names: &[String]) -> Result<()> {
    let config = config::load()?;
    let tunnels = config.select(names)?;
    run_daemon(paths, tunnels, Collaborators::system()).await
}
