//! Single-instance enforcement via a plain-text PID file.
//!
//! Acquisition is check-then-write, not an atomic lock: two processes racing
//! through `acquire` at the same instant could both succeed. Good enough for
//! the "user starts the daemon twice" case this guards against.

use std::fs;
use std::path::PathBuf;

use crate::error::DaemonError;

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Try to take ownership. Returns `Ok(false)` when the file names a
    /// still-live process; a stale file (dead pid) is removed first.
    pub fn acquire(&self) -> Result<bool, DaemonError> {
        if let Some(pid) = self.read()? {
            if process_alive(pid) {
                tracing::warn!(pid, path = %self.path.display(), "Daemon already running");
                return Ok(false);
            }
            tracing::info!(pid, "Removing stale PID file");
            fs::remove_file(&self.path)
                .map_err(|e| DaemonError::PidFile { path: self.path.clone(), source: e })?;
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DaemonError::CreateDir { path: parent.to_path_buf(), source: e })?;
        }
        fs::write(&self.path, std::process::id().to_string())
            .map_err(|e| DaemonError::PidFile { path: self.path.clone(), source: e })?;
        Ok(true)
    }

    /// Owning pid recorded in the file, if the file exists and parses.
    pub fn read(&self) -> Result<Option<i32>, DaemonError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => Ok(raw.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DaemonError::PidFile { path: self.path.clone(), source: e }),
        }
    }

    /// Best-effort removal on shutdown.
    pub fn release(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), "Failed to remove PID file: {e}");
            }
        }
    }
}

/// Signal-0 liveness probe. EPERM means the process exists but belongs to
/// someone else, which still counts as alive.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub fn process_alive(_pid: i32) -> bool {
    // No cheap liveness probe; treat any recorded pid as live.
    true
}
