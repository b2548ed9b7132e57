//! Manifest dialect selection.

use std::path::Path;

use crate::foreign;
use crate::manifest::{Manifest, ManifestError, MANIFEST_FILE_NAME};

/// The two manifest dialects, selected by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Native `kcjpm.toml`.
    Canonical,
    /// Compatibility `cjpm.toml`.
    Foreign,
}

impl Dialect {
    /// The manifest file name this dialect is probed by.
    pub const fn file_name(self) -> &'static str {
        match self {
            Dialect::Canonical => MANIFEST_FILE_NAME,
            Dialect::Foreign => foreign::FOREIGN_MANIFEST_FILE_NAME,
        }
    }

    /// Parse manifest text in this dialect into the canonical model.
    ///
    /// # Errors
    /// Returns an error if parsing or validation fails.
    pub fn parse(self, content: &str, path: &str) -> Result<Manifest, ManifestError> {
        match self {
            Dialect::Canonical => Manifest::from_str(content, path),
            Dialect::Foreign => foreign::from_str(content, path),
        }
    }

    /// Read and parse a manifest file in this dialect.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, or parsing fails.
    pub fn load(self, path: &Path) -> Result<Manifest, ManifestError> {
        match self {
            Dialect::Canonical => Manifest::from_path(path),
            Dialect::Foreign => foreign::from_path(path),
        }
    }
}

/// Choose a dialect by probing for manifest file names in the project root.
/// The native dialect wins when both files are present.
///
/// # Errors
/// Returns an error if neither manifest file exists.
pub fn detect_dialect(root: &Path) -> Result<Dialect, ManifestError> {
    for dialect in [Dialect::Canonical, Dialect::Foreign] {
        if root.join(dialect.file_name()).is_file() {
            return Ok(dialect);
        }
    }
    Err(ManifestError::MissingManifest {
        path: root.display().to_string(),
    })
}

/// Detect the dialect in `root` and load its manifest.
///
/// # Errors
/// Returns an error if no manifest exists or parsing fails.
pub fn load_from_project_root(root: &Path) -> Result<Manifest, ManifestError> {
    let dialect = detect_dialect(root)?;
    dialect.load(&root.join(dialect.file_name()))
}
