//! Advisory file locks for cache directories and project build locks.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::UtilError;

/// How long `acquire` waits for a contended lock before giving up.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between acquisition attempts.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// An advisory lock backed by an exclusively-created sentinel file.
///
/// The lock file is removed when the guard is dropped. A crashed process can
/// leave a stale sentinel behind; acquisition then times out with an error
/// telling the operator which file to remove.
#[derive(Debug)]
pub struct AdvisoryLock {
    path: PathBuf,
}

impl AdvisoryLock {
    /// Acquire the lock at `path`, retrying until the timeout elapses.
    ///
    /// # Errors
    /// Returns an error if the sentinel cannot be created for a reason other
    /// than contention, or if the timeout elapses.
    pub fn acquire(path: &Path) -> Result<Self, UtilError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| UtilError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let deadline = Instant::now() + ACQUIRE_TIMEOUT;
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)
            {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if Instant::now() >= deadline {
                        return Err(UtilError::LockTimeout {
                            path: path.display().to_string(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(source) => {
                    return Err(UtilError::Io {
                        path: path.display().to_string(),
                        source,
                    })
                }
            }
        }
    }

    /// The sentinel file path held by this guard.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
