//! Shutdown signalling for the daemon and foreground runs
//!
//! [`ShutdownToken`] is the single termination handle threaded through the
//! orchestrator, the executors and the control socket. It wraps a
//! [`CancellationToken`] and latches the first reason it was triggered for,
//! so callers can tell a user stop from a signal, a deadline or a failure.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopCause {
    /// Cancelled by the owner of the token
    Cancelled,
    /// A deadline attached with [`ShutdownToken::with_deadline`] expired
    DeadlineExceeded,
    /// SIGINT or SIGTERM
    Signal(&'static str),
    /// `stop` received on the control socket
    StopRequested,
    /// A component the run depends on failed
    Failed(String),
}

impl StopCause {
    /// Whether the process should exit with a failure status
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopCause::Failed(_))
    }

    /// Whether the run was ended on purpose by a user
    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            StopCause::Cancelled | StopCause::Signal(_) | StopCause::StopRequested
        )
    }
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::Cancelled => write!(f, "cancelled"),
            StopCause::DeadlineExceeded => write!(f, "deadline exceeded"),
            StopCause::Signal(name) => write!(f, "received {}", name),
            StopCause::StopRequested => write!(f, "stop requested"),
            StopCause::Failed(message) => write!(f, "{}", message),
        }
    }
}

/// Cloneable cancellation handle that remembers its first cause
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    token: CancellationToken,
    cause: Arc<OnceLock<StopCause>>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel with `cause`; returns `false` if the token was already triggered
    pub fn trigger(&self, cause: StopCause) -> bool {
        let first = self.cause.set(cause).is_ok();
        self.token.cancel();
        first
    }

    /// Cancel with [`StopCause::Cancelled`]
    pub fn cancel(&self) {
        self.trigger(StopCause::Cancelled);
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the token has been triggered
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// First cause the token was triggered with
    pub fn cause(&self) -> Option<StopCause> {
        self.cause.get().cloned()
    }

    /// Trigger [`StopCause::DeadlineExceeded`] after `deadline` unless
    /// something else ends the run first
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_deadline(self, deadline: Duration) -> Self {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    token.trigger(StopCause::DeadlineExceeded);
                }
            }
        });
        self
    }
}

/// Owns the run's [`ShutdownToken`] and the OS signal listener
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: ShutdownToken,
    signals: Option<JoinHandle<()>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Trigger the token on the first SIGINT or SIGTERM
    #[cfg(unix)]
    pub fn listen_for_signals(&mut self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = self.token.clone();

        self.signals = Some(tokio::spawn(async move {
            let name = tokio::select! {
                _ = sigint.recv() => "SIGINT",
                _ = sigterm.recv() => "SIGTERM",
                _ = token.cancelled() => return,
            };
            tracing::info!("Received {}, initiating shutdown", name);
            token.trigger(StopCause::Signal(name));
        }));
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn listen_for_signals(&mut self) -> std::io::Result<()> {
        let token = self.token.clone();
        self.signals = Some(tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        tracing::info!("Received Ctrl+C, initiating shutdown");
                        token.trigger(StopCause::Signal("SIGINT"));
                    }
                }
                _ = token.cancelled() => {}
            }
        }));
        Ok(())
    }

    /// Stop listening for signals
    pub fn finish(&mut self) {
        if let Some(handle) = self.signals.take() {
            handle.abort();
        }
    }
}

impl Drop for ShutdownCoordinator {
    fn drop(&mut self) {
        self.finish();
    }
}
