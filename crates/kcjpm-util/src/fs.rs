//! The pluggable `FileSystem` capability and path helpers.
//!
//! Directory and file operations the engine performs go through the
//! [`FileSystem`] trait, so pipelines can run against alternative backends;
//! only process-local conveniences (atomic writes, the kcjpm home) live as
//! free functions.

use std::path::{Component, Path, PathBuf};

use crate::error::UtilError;

fn io_err(path: &Path, source: std::io::Error) -> UtilError {
    UtilError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// A uniform filesystem surface, injected into the engine so that the
/// pipeline can be exercised against alternative backends.
pub trait FileSystem: std::fmt::Debug + Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;

    /// Create a directory and all missing parents.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    fn create_dirs(&self, path: &Path) -> Result<(), UtilError>;

    /// Remove a directory and its contents. Absent directories are not an error.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be removed.
    fn remove_dir_all(&self, path: &Path) -> Result<(), UtilError>;

    /// Read a file as UTF-8 text.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid UTF-8.
    fn read_text(&self, path: &Path) -> Result<String, UtilError>;

    /// Write UTF-8 text, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    fn write_text(&self, path: &Path, content: &str) -> Result<(), UtilError>;

    /// List the entries of a directory (files and directories), sorted by path.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, UtilError>;

    /// Copy a file to a new location, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if the copy fails.
    fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), UtilError>;

    /// Rename a file or directory.
    ///
    /// # Errors
    /// Returns an error if the rename fails.
    fn rename(&self, src: &Path, dest: &Path) -> Result<(), UtilError>;

    /// Make a path absolute against the working directory, without
    /// resolving symlinks.
    ///
    /// # Errors
    /// Returns an error if the working directory cannot be determined.
    fn absolute(&self, path: &Path) -> Result<PathBuf, UtilError> {
        if path.is_absolute() {
            Ok(normalize(path))
        } else {
            Ok(normalize(&self.working_dir()?.join(path)))
        }
    }

    /// The process working directory.
    ///
    /// # Errors
    /// Returns an error if it cannot be determined.
    fn working_dir(&self) -> Result<PathBuf, UtilError>;

    /// A directory for scratch files.
    fn temp_dir(&self) -> PathBuf;
}

/// The real filesystem, backed by `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFileSystem;

impl FileSystem for HostFileSystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn create_dirs(&self, path: &Path) -> Result<(), UtilError> {
        std::fs::create_dir_all(path).map_err(|source| io_err(path, source))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<(), UtilError> {
        // Report a failure only if there is still something left to remove;
        // racing with another remover is indistinguishable from success.
        match std::fs::remove_dir_all(path) {
            Err(source) if path.exists() => Err(io_err(path, source)),
            _ => Ok(()),
        }
    }

    fn read_text(&self, path: &Path) -> Result<String, UtilError> {
        std::fs::read_to_string(path).map_err(|source| io_err(path, source))
    }

    fn write_text(&self, path: &Path, content: &str) -> Result<(), UtilError> {
        if let Some(parent) = path.parent() {
            self.create_dirs(parent)?;
        }
        std::fs::write(path, content).map_err(|source| io_err(path, source))
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>, UtilError> {
        let entries = std::fs::read_dir(path).map_err(|source| io_err(path, source))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_err(path, source))?;
            out.push(entry.path());
        }
        out.sort();
        Ok(out)
    }

    fn copy_file(&self, src: &Path, dest: &Path) -> Result<(), UtilError> {
        if let Some(parent) = dest.parent() {
            self.create_dirs(parent)?;
        }
        std::fs::copy(src, dest)
            .map(|_| ())
            .map_err(|source| io_err(dest, source))
    }

    fn rename(&self, src: &Path, dest: &Path) -> Result<(), UtilError> {
        std::fs::rename(src, dest).map_err(|source| io_err(dest, source))
    }

    fn working_dir(&self) -> Result<PathBuf, UtilError> {
        std::env::current_dir().map_err(|source| io_err(Path::new("."), source))
    }

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }
}

/// Write a file atomically: write to a temporary sibling, then rename.
///
/// Readers never observe a partially-written file.
///
/// # Errors
/// Returns an error if the temporary file cannot be written or renamed.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), UtilError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| io_err(parent, source))?;
    }
    let tmp_path = staging_path(path);
    std::fs::write(&tmp_path, content).map_err(|source| io_err(&tmp_path, source))?;
    std::fs::rename(&tmp_path, path).map_err(|source| io_err(path, source))
}

/// Return the `.tmp` sibling used to stage partial writes of `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Return the kcjpm home directory (`~/.kcjpm`).
///
/// Resolves via `HOME` (Unix) or `USERPROFILE` (Windows).
///
/// # Errors
/// Returns an error if neither environment variable is set.
pub fn kcjpm_home() -> Result<PathBuf, UtilError> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .map_err(|_| UtilError::NoHomeDir)?;
    Ok(home.join(".kcjpm"))
}

/// Resolve `.` and `..` components lexically, without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a path with forward slashes regardless of platform.
pub fn to_forward_slashes(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}
