//! tunn CLI
//!
//! Single binary for every tunn operation:
//! - `tunn [names]` runs tunnels attached to the terminal
//! - `tunn -d [names]` launches the background daemon
//! - `tunn status|stop|version` talk to the daemon

use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunn::commands;
use tunn::supervisor::open_log;
use tunn_core::DaemonPaths;

#[derive(Parser)]
#[command(name = "tunn")]
#[command(author, version, about = "Keep named SSH port-forward tunnels alive")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Run tunnels in a background daemon
    #[arg(short, long)]
    detach: bool,

    /// Tunnels to start (all configured tunnels when omitted)
    #[arg(value_name = "NAME")]
    names: Vec<String>,

    /// Run as the background daemon (spawned by `tunn -d`)
    #[arg(long = "internal-daemon", hide = true, conflicts_with = "detach")]
    internal_daemon: bool,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon and tunnel status
    Status,

    /// Stop the running daemon
    Stop,

    /// Print the tunn version
    Version,
}

fn log_level(quiet: bool, verbose: u8) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()))
}

fn init_cli_logging(cli: &Cli) {
    tracing_subscriber::registry()
        .with(env_filter(log_level(cli.quiet, cli.verbose)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// Route daemon logs into its own log file
fn init_daemon_logging(paths: &DaemonPaths, cli: &Cli) -> Result<()> {
    paths
        .ensure_runtime_dir()
        .context("failed to create runtime directory")?;
    let file = open_log(&paths.log_file)
        .with_context(|| format!("failed to open log file {:?}", paths.log_file))?;

    let default = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(env_filter(default))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let paths = DaemonPaths::resolve().context("failed to resolve runtime directory")?;

    if cli.internal_daemon {
        init_daemon_logging(&paths, &cli)?;
        return commands::run_daemon_command(paths, &cli.names).await;
    }

    init_cli_logging(&cli);

    match cli.command {
        Some(Commands::Status) => commands::status_command(&paths).await,
        Some(Commands::Stop) => commands::stop_command(&paths).await,
        Some(Commands::Version) => {
            commands::version_command();
            Ok(())
        }
        None => commands::start_command(&paths, &cli.names, cli.detach).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
