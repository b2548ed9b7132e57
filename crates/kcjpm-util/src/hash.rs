//! Content fingerprints: archive checksums, and the labeled composite
//! digests behind incremental change detection.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::UtilError;

/// Hex SHA-256 of a byte buffer. Used to verify downloaded archives against
/// their advertised checksums.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Accumulates labeled components into one stable hex digest.
///
/// Every component is framed as `len(label) · label · len(value) · value`,
/// so two fingerprints agree only when they carry the same labels with the
/// same values in the same order — shifting bytes between a label and its
/// value, or between adjacent components, changes the digest. Change
/// detection relies on this: a package fingerprint labels each input (source
/// file, imported package, external dependency) so a rename registers even
/// when the content is untouched.
#[derive(Debug, Default)]
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mix in one labeled component.
    pub fn component(&mut self, label: &str, value: &[u8]) {
        self.frame(label.as_bytes());
        self.frame(value);
    }

    /// Mix in a file's content under the given label.
    ///
    /// The content is streamed through an inner digest, so large files are
    /// never held in memory; the inner digest then joins the fingerprint as
    /// an ordinary component.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read.
    pub fn file(&mut self, label: &str, path: &Path) -> Result<(), UtilError> {
        let digest = stream_file_digest(path)?;
        self.component(label, digest.as_bytes());
        Ok(())
    }

    fn frame(&mut self, bytes: &[u8]) {
        let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        self.hasher.update(len.to_le_bytes());
        self.hasher.update(bytes);
    }

    /// The accumulated digest as lowercase hex.
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

fn stream_file_digest(path: &Path) -> Result<String, UtilError> {
    let mut file = std::fs::File::open(path).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|source| UtilError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint of every `.cj` file under `dir`.
///
/// Files are labeled by their forward-slash relative path and visited in
/// sorted order, so the digest is stable across platforms and directory
/// enumeration order, and a moved or renamed source registers as a change.
/// Files of other types are invisible to the digest.
///
/// # Errors
/// Returns an error if the directory cannot be enumerated or a source file
/// cannot be read.
pub fn source_tree_hash(dir: &Path) -> Result<String, UtilError> {
    let pattern = dir.join("**").join("*.cj");
    let pattern_str = pattern.display().to_string();

    let mut sources: Vec<_> = glob::glob(&pattern_str)
        .map_err(|e| UtilError::GlobPattern {
            pattern: pattern_str.clone(),
            message: e.to_string(),
        })?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    sources.sort();

    let mut fingerprint = Fingerprint::new();
    for source in &sources {
        let relative = source.strip_prefix(dir).unwrap_or(source);
        fingerprint.file(&crate::fs::to_forward_slashes(relative), source)?;
    }
    Ok(fingerprint.finish())
}
