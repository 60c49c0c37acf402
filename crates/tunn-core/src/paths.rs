//! Filesystem anchors for one daemon instance

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Directory name under the runtime/cache base
const APP_DIR_NAME: &str = "tunn";

const PID_FILE_NAME: &str = "daemon.pid";
const SOCKET_FILE_NAME: &str = "daemon.sock";
const LOG_FILE_NAME: &str = "daemon.log";

/// Runtime directory, PID file, control socket and log file of the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    pub runtime_dir: PathBuf,
    pub pid_file: PathBuf,
    pub socket_file: PathBuf,
    pub log_file: PathBuf,
}

impl DaemonPaths {
    /// Resolve paths from the environment and create the runtime directory
    ///
    /// Uses `$XDG_RUNTIME_DIR/tunn`, falling back to `~/.cache/tunn`.
    pub fn resolve() -> io::Result<Self> {
        let runtime_dir = runtime_dir_from(std::env::var_os("XDG_RUNTIME_DIR"), dirs::home_dir())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "failed to determine home directory")
            })?;
        let paths = Self::in_dir(runtime_dir);
        paths.ensure_runtime_dir()?;
        Ok(paths)
    }

    /// Paths rooted at an explicit directory
    pub fn in_dir(runtime_dir: impl Into<PathBuf>) -> Self {
        let runtime_dir = runtime_dir.into();
        Self {
            pid_file: runtime_dir.join(PID_FILE_NAME),
            socket_file: runtime_dir.join(SOCKET_FILE_NAME),
            log_file: runtime_dir.join(LOG_FILE_NAME),
            runtime_dir,
        }
    }

    /// Create the runtime directory with owner-only permissions
    pub fn ensure_runtime_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.runtime_dir)?;
        restrict_dir(&self.runtime_dir)
    }
}

/// Pick the runtime directory from `XDG_RUNTIME_DIR` and the home directory
pub fn runtime_dir_from(
    xdg_runtime_dir: Option<OsString>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    match xdg_runtime_dir.filter(|dir| !dir.is_empty()) {
        Some(dir) => Some(PathBuf::from(dir).join(APP_DIR_NAME)),
        None => home.map(|home| home.join(".cache").join(APP_DIR_NAME)),
    }
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            tracing::warn!("Could not restrict permissions on {:?}: {}", dir, e);
            Ok(())
        }
        other => other,
    }
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
