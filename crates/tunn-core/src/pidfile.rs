//! PID file utilities for single-instance management
//!
//! The daemon is considered live when its PID file names a running process.
//! PID file and control socket are expected to exist together; anything else
//! is stale and gets removed by [`check_running`].

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::paths::DaemonPaths;

/// Read the PID from the PID file
///
/// Returns `Ok(Some(pid))` if the file exists and contains a valid PID,
/// `Ok(None)` if the file doesn't exist or is empty, or an error if the file
/// is malformed.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let contents = contents.trim();
            if contents.is_empty() {
                return Ok(None);
            }
            let pid = contents
                .parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a PID to the PID file with owner-only permissions
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    writeln!(file, "{}", pid)?;
    Ok(())
}

/// Remove a file, treating "already gone" as success
fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove the PID file
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    remove_if_exists(path)
}

/// Remove the control socket file
pub fn remove_socket_file(path: &Path) -> io::Result<()> {
    remove_if_exists(path)
}

/// Remove both daemon artifacts, logging failures
pub fn cleanup(paths: &DaemonPaths) {
    if let Err(e) = remove_pid_file(&paths.pid_file) {
        tracing::warn!("Failed to remove PID file {:?}: {}", paths.pid_file, e);
    }
    if let Err(e) = remove_socket_file(&paths.socket_file) {
        tracing::warn!("Failed to remove socket {:?}: {}", paths.socket_file, e);
    }
}

/// Check if a process with the given PID is still alive
///
/// `kill(pid, 0)` only tells "exists (or not ours)" apart from "does not
/// exist"; it says nothing about what the process is.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 performs only the existence and permission check.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    tracing::warn!("Process existence check not implemented for this platform");
    true
}

/// Check whether a daemon is live, healing stale artifacts
///
/// Returns the PID of a live daemon. When the PID file is missing, empty or
/// names a dead process, the PID and socket files are removed and `None` is
/// returned.
pub fn check_running(paths: &DaemonPaths) -> io::Result<Option<u32>> {
    match read_pid_file(&paths.pid_file)? {
        Some(pid) if is_process_alive(pid) => Ok(Some(pid)),
        Some(pid) => {
            tracing::debug!(pid, "Removing stale daemon artifacts");
            cleanup(paths);
            Ok(None)
        }
        None => {
            if paths.socket_file.exists() {
                tracing::debug!("Removing orphaned control socket {:?}", paths.socket_file);
                remove_socket_file(&paths.socket_file)?;
            }
            Ok(None)
        }
    }
}

/// Removes the PID and socket files exactly once
///
/// Cleanup runs on the first [`ArtifactGuard::release`] or on drop, whichever
/// comes first.
#[derive(Debug)]
pub struct ArtifactGuard {
    paths: DaemonPaths,
    released: AtomicBool,
}

impl ArtifactGuard {
    pub fn new(paths: DaemonPaths) -> Self {
        Self {
            paths,
            released: AtomicBool::new(false),
        }
    }

    /// Remove the artifacts; returns `false` if that already happened
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        cleanup(&self.paths);
        true
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_paths() -> (TempDir, DaemonPaths) {
        let dir = TempDir::new().unwrap();
        let paths = DaemonPaths::in_dir(dir.path());
        (dir, paths)
    }

    #[test]
    fn test_read_nonexistent_pid_file() {
        let (_dir, paths) = temp_paths();
        assert!(read_pid_file(&paths.pid_file).unwrap().is_none());
    }

    #[test]
    fn test_write_and_read_pid_file() {
        let (_dir, paths) = temp_paths();

        write_pid_file(&paths.pid_file, 12345).unwrap();
        assert_eq!(read_pid_file(&paths.pid_file).unwrap(), Some(12345));
        assert_eq!(fs::read_to_string(&paths.pid_file).unwrap(), "12345\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, paths) = temp_paths();
        write_pid_file(&paths.pid_file, 1).unwrap();
        let mode = fs::metadata(&paths.pid_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_malformed_pid_file() {
        let (_dir, paths) = temp_paths();
        fs::write(&paths.pid_file, "not-a-pid").unwrap();
        let err = read_pid_file(&paths.pid_file).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_remove_nonexistent_pid_file() {
        let (_dir, paths) = temp_paths();
        remove_pid_file(&paths.pid_file).unwrap();
    }

    #[test]
    fn test_current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pid_not_alive() {
        assert!(!is_process_alive(999999999));
        assert!(!is_process_alive(0));
    }

    #[test]
    fn test_check_running_live() {
        let (_dir, paths) = temp_paths();
        let pid = std::process::id();
        write_pid_file(&paths.pid_file, pid).unwrap();

        assert_eq!(check_running(&paths).unwrap(), Some(pid));
        assert!(paths.pid_file.exists());
    }

    #[test]
    fn test_check_running_heals_stale_artifacts() {
        let (_dir, paths) = temp_paths();
        write_pid_file(&paths.pid_file, 999999).unwrap();
        fs::write(&paths.socket_file, "stub").unwrap();

        assert_eq!(check_running(&paths).unwrap(), None);
        assert!(!paths.pid_file.exists());
        assert!(!paths.socket_file.exists());
    }

    #[test]
    fn test_check_running_removes_orphaned_socket() {
        let (_dir, paths) = temp_paths();
        fs::write(&paths.socket_file, "stub").unwrap();

        assert_eq!(check_running(&paths).unwrap(), None);
        assert!(!paths.socket_file.exists());
    }

    #[test]
    fn test_artifact_guard_releases_once() {
        let (_dir, paths) = temp_paths();
        write_pid_file(&paths.pid_file, 42).unwrap();
        fs::write(&paths.socket_file, "stub").unwrap();

        let guard = ArtifactGuard::new(paths.clone());
        assert!(guard.release());
        assert!(!paths.pid_file.exists());
        assert!(!paths.socket_file.exists());

        // A later daemon's files must survive the second release and the drop
        write_pid_file(&paths.pid_file, 43).unwrap();
        assert!(!guard.release());
        drop(guard);
        assert!(paths.pid_file.exists());
    }

    #[test]
    fn test_artifact_guard_cleans_on_drop() {
        let (_dir, paths) = temp_paths();
        write_pid_file(&paths.pid_file, 42).unwrap();

        {
            let _guard = ArtifactGuard::new(paths.clone());
        }
        assert!(!paths.pid_file.exists());
    }
}
