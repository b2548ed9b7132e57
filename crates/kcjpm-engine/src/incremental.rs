//! Per-package fingerprints backing incremental change detection.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use kcjpm_util::hash::Fingerprint;

use crate::discover::PackageInfo;
use crate::error::EngineError;
use crate::events::ChangeKind;

/// Directory under the build output path holding incremental state.
pub const INCREMENTAL_DIR: &str = ".incremental";

const FINGERPRINTS_FILE: &str = "fingerprints.toml";

/// The persisted fingerprint table, one entry per compiled unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintFile {
    #[serde(default, rename = "package", skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFingerprint {
    /// Hash of the unit's own source files.
    pub source_hash: String,
    /// `source_hash` combined with the hashes of everything the unit
    /// depends on.
    pub full_hash: String,
}

/// Load the fingerprint table from `<output_path>/.incremental/`.
///
/// A missing or unreadable file degrades to an empty table (a full rebuild),
/// never an error.
pub fn load(output_path: &Path) -> FingerprintFile {
    let path = output_path.join(INCREMENTAL_DIR).join(FINGERPRINTS_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable fingerprint file");
            FingerprintFile::default()
        }),
        Err(_) => FingerprintFile::default(),
    }
}

/// Persist the fingerprint table atomically.
///
/// # Errors
/// Returns an error if serialization or the write fails.
pub fn store(output_path: &Path, fingerprints: &FingerprintFile) -> Result<(), EngineError> {
    let path = output_path.join(INCREMENTAL_DIR).join(FINGERPRINTS_FILE);
    let content = toml::to_string_pretty(fingerprints).map_err(|e| EngineError::Io {
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()),
    })?;
    kcjpm_util::fs::write_atomic(&path, &content)?;
    Ok(())
}

/// Content hash of a package's own source files, each labeled by file name
/// so a rename registers as a change.
///
/// # Errors
/// Returns an error if a source file cannot be read.
pub fn package_source_hash(package: &PackageInfo) -> Result<String, EngineError> {
    let mut fingerprint = Fingerprint::new();
    for file in &package.source_files {
        let label = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        fingerprint.file(label, file)?;
    }
    Ok(fingerprint.finish())
}

/// Combine a package's own hash with its dependencies' full hashes.
pub fn combine(source_hash: &str, dependency_hashes: &[&str]) -> String {
    let mut fingerprint = Fingerprint::new();
    fingerprint.component("source", source_hash.as_bytes());
    for hash in dependency_hashes {
        fingerprint.component("dependency", hash.as_bytes());
    }
    fingerprint.finish()
}

/// Classify a package against its previous fingerprint.
pub fn detect_change(
    previous: Option<&PackageFingerprint>,
    current: &PackageFingerprint,
) -> ChangeKind {
    match previous {
        None => ChangeKind::New,
        Some(prev) if prev.source_hash != current.source_hash => ChangeKind::SourceChanged,
        Some(prev) if prev.full_hash != current.full_hash => ChangeKind::DependencyChanged,
        Some(_) => ChangeKind::Unchanged,
    }
}
