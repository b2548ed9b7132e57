//! The shared dependency cache under `~/.kcjpm/cache`.
//!
//! Population of one cache slot follows a fixed protocol: acquire the
//! advisory lock, check the completion sentinel, populate a `.tmp` staging
//! sibling, rename it into place, write the sentinel, release the lock.
//! Readers may use a slot without locking once the sentinel exists.

use std::path::{Path, PathBuf};

use kcjpm_util::lock::AdvisoryLock;

use crate::error::EngineError;

/// Name of the completion sentinel inside a populated slot.
const COMPLETE_MARKER: &str = ".complete";

/// Default cache root (`~/.kcjpm/cache`).
///
/// # Errors
/// Returns an error if the home directory cannot be determined.
pub fn default_cache_root() -> Result<PathBuf, EngineError> {
    Ok(kcjpm_util::fs::kcjpm_home()?.join("cache"))
}

/// One `(source, version)` directory in the shared cache.
#[derive(Debug)]
pub struct CacheSlot {
    dir: PathBuf,
}

impl CacheSlot {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The final directory of this slot.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the slot has been fully populated.
    pub fn is_complete(&self) -> bool {
        self.dir.join(COMPLETE_MARKER).is_file()
    }

    /// Read the note stored when the slot was committed (e.g. a resolved
    /// commit hash or an archive checksum).
    pub fn completion_note(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.join(COMPLETE_MARKER))
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }

    /// Acquire the advisory lock serializing writers of this slot.
    ///
    /// # Errors
    /// Returns an error if the lock cannot be acquired.
    pub fn lock(&self) -> Result<AdvisoryLock, EngineError> {
        let mut name = self.dir.as_os_str().to_os_string();
        name.push(".lock");
        Ok(AdvisoryLock::acquire(Path::new(&name))?)
    }

    /// The `.tmp` sibling partial writes are staged in.
    pub fn staging_dir(&self) -> PathBuf {
        kcjpm_util::fs::staging_path(&self.dir)
    }

    /// Atomically promote the staging directory to the final slot and write
    /// the completion sentinel. Any stale final directory is replaced.
    ///
    /// # Errors
    /// Returns an error if the rename or sentinel write fails.
    pub fn commit(&self, note: &str) -> Result<(), EngineError> {
        self.commit_from(&self.staging_dir(), note)
    }

    /// Like [`CacheSlot::commit`], promoting `content_dir` instead of the
    /// default staging sibling (used when an unpacked archive nests its
    /// content one directory deep).
    ///
    /// # Errors
    /// Returns an error if the rename or sentinel write fails.
    pub fn commit_from(&self, content_dir: &Path, note: &str) -> Result<(), EngineError> {
        // Writers hold the slot lock, so a sentinel-less final directory is
        // a stale leftover, never a live population.
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir).map_err(|source| EngineError::Io {
                path: self.dir.display().to_string(),
                source,
            })?;
        }
        std::fs::rename(content_dir, &self.dir).map_err(|source| EngineError::Io {
            path: self.dir.display().to_string(),
            source,
        })?;
        std::fs::write(self.dir.join(COMPLETE_MARKER), note).map_err(|source| EngineError::Io {
            path: self.dir.join(COMPLETE_MARKER).display().to_string(),
            source,
        })?;
        Ok(())
    }
}
