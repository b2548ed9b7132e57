//! The `kcjpm.lock` lock file: a deterministic snapshot of resolved
//! dependencies.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;
use crate::source::PackageSource;

/// File name of the lock file under a project root.
pub const LOCK_FILE_NAME: &str = "kcjpm.lock";

/// Current lock file schema version.
pub const LOCK_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockFile {
    pub version: u32,
    pub metadata: LockMetadata,
    #[serde(default, rename = "package", skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<LockedPackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockMetadata {
    /// Unix timestamp (seconds) of generation.
    pub generated_at: String,
    /// Version of the tool that wrote the file.
    pub tool_version: String,
}

/// One pinned dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    pub source: PackageSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Outcome of validating a lock file against the current manifest.
#[derive(Debug, Default)]
pub struct LockValidation {
    /// Missing critical entries; any error makes the lock file unusable.
    pub errors: Vec<String>,
    /// Drift between the manifest and the lock file.
    pub warnings: Vec<String>,
}

impl LockValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("no lock file found at {path}")]
    Missing { path: String },
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid kcjpm.lock at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize lock file: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("cannot write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("lock file {path} has schema version {found}, expected {expected}")]
    SchemaVersionMismatch {
        path: String,
        found: u32,
        expected: u32,
    },
    #[error("invalid kcjpm.lock at {path}: {message}")]
    Invalid { path: String, message: String },
}

impl LockFile {
    /// Create an empty lock file stamped with the given tool version.
    pub fn new(tool_version: &str) -> Self {
        Self {
            version: LOCK_SCHEMA_VERSION,
            metadata: LockMetadata {
                generated_at: unix_timestamp(),
                tool_version: tool_version.to_owned(),
            },
            packages: Vec::new(),
        }
    }

    /// Side-effect-free probe for the lock file under `root`.
    pub fn exists(root: &Path) -> bool {
        root.join(LOCK_FILE_NAME).is_file()
    }

    /// Read and parse the lock file under `root`.
    ///
    /// # Errors
    /// Returns `LockError::Missing` when the file does not exist, and parse,
    /// schema, or integrity errors otherwise.
    pub fn read(root: &Path) -> Result<Self, LockError> {
        let path = root.join(LOCK_FILE_NAME);
        if !path.is_file() {
            return Err(LockError::Missing {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).map_err(|source| LockError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Parse lock file text; `origin` is used in error messages.
    ///
    /// # Errors
    /// Returns parse, schema, or integrity errors.
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self, LockError> {
        let lock: LockFile = toml::from_str(content).map_err(|source| LockError::Parse {
            path: origin.to_owned(),
            source,
        })?;
        if lock.version != LOCK_SCHEMA_VERSION {
            return Err(LockError::SchemaVersionMismatch {
                path: origin.to_owned(),
                found: lock.version,
                expected: LOCK_SCHEMA_VERSION,
            });
        }
        if let Err(message) = lock.integrity() {
            return Err(LockError::Invalid {
                path: origin.to_owned(),
                message,
            });
        }
        Ok(lock)
    }

    /// Serialize to TOML text.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, LockError> {
        toml::to_string_pretty(self).map_err(|source| LockError::Serialize { source })
    }

    /// Write the lock file under `root` atomically (write to a temporary
    /// sibling, then rename), so readers never observe a partial file.
    ///
    /// # Errors
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn write(&self, root: &Path) -> Result<(), LockError> {
        let path = root.join(LOCK_FILE_NAME);
        let content = self.to_toml()?;
        let tmp_path = path.with_extension("lock.tmp");
        std::fs::write(&tmp_path, &content).map_err(|source| LockError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| LockError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check structural invariants: unique package names, and every listed
    /// dependency name resolving to a locked package.
    fn integrity(&self) -> Result<(), String> {
        let mut names = BTreeSet::new();
        for package in &self.packages {
            if !names.insert(package.name.as_str()) {
                return Err(format!("duplicate package `{}`", package.name));
            }
        }
        for package in &self.packages {
            for dep in &package.dependencies {
                if !names.contains(dep.as_str()) {
                    return Err(format!(
                        "package `{}` depends on `{dep}` which is not in the lock file",
                        package.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Validate this lock file against the current manifest's dependency
    /// declarations.
    ///
    /// A non-optional declared dependency missing from the lock file is an
    /// error (the lock file cannot satisfy the build); a locked package no
    /// longer declared is drift, reported as a warning.
    pub fn validate(&self, manifest: &Manifest) -> LockValidation {
        let mut result = LockValidation::default();

        let locked: BTreeSet<&str> = self.packages.iter().map(|p| p.name.as_str()).collect();
        let declared: BTreeSet<&str> = manifest.dependencies.keys().map(String::as_str).collect();

        let mut missing = Vec::new();
        for (name, spec) in &manifest.dependencies {
            if !spec.optional() && !locked.contains(name.as_str()) {
                missing.push(name.as_str());
                result
                    .errors
                    .push(format!("dependency `{name}` is declared in the manifest but not pinned in the lock file"));
            }
        }

        let mut stale = Vec::new();
        for package in &self.packages {
            if !declared.contains(package.name.as_str()) {
                stale.push(package.name.as_str());
                result.warnings.push(format!(
                    "lock file pins `{}` which is no longer declared in the manifest",
                    package.name
                ));
            }
        }

        if !missing.is_empty() {
            if stale.is_empty() {
                result.warnings.push(format!(
                    "lock file is out of date: manifest declares {}",
                    quote_join(&missing)
                ));
            } else {
                result.warnings.push(format!(
                    "lock file is out of date: manifest declares {} but the lock file pins {}",
                    quote_join(&missing),
                    quote_join(&stale)
                ));
            }
        }

        result
    }
}

fn quote_join(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn unix_timestamp() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use crate::manifest::{BuildConfig, DependencySpec, OutputType, Package};
    use crate::source::GitReference;

    use super::*;

    fn locked(name: &str, version: &str, deps: &[&str]) -> LockedPackage {
        LockedPackage {
            name: name.to_owned(),
            version: version.to_owned(),
            source: PackageSource::Registry {
                url: "https://repo.example.com".to_owned(),
            },
            checksum: None,
            dependencies: deps.iter().map(|d| (*d).to_owned()).collect(),
        }
    }

    fn manifest_with_deps(deps: &[(&str, &str)]) -> Manifest {
        let dependencies: BTreeMap<String, DependencySpec> = deps
            .iter()
            .map(|(name, version)| {
                (
                    (*name).to_owned(),
                    DependencySpec::Registry {
                        version: (*version).to_owned(),
                        registry: "default".to_owned(),
                        optional: false,
                    },
                )
            })
            .collect();
        Manifest {
            package: Package {
                name: "app".to_owned(),
                version: "0.1.0".to_owned(),
                cjc_version: None,
                output_type: OutputType::Executable,
                description: None,
            },
            dependencies,
            build: BuildConfig::default(),
            profiles: crate::manifest::default_profiles(),
            registry: None,
            workspace: None,
            package_configuration: BTreeMap::new(),
        }
    }

    #[test]
    fn write_and_read_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("lib-a", "1.0.0", &[]));
        lock.packages.push(LockedPackage {
            name: "lib-b".to_owned(),
            version: "2.0.0".to_owned(),
            source: PackageSource::Git {
                url: "https://github.com/u/lib-b".to_owned(),
                reference: GitReference::Tag("v2.0.0".to_owned()),
                resolved_commit: Some("abc123".to_owned()),
            },
            checksum: Some("sha256:deadbeef".to_owned()),
            dependencies: vec!["lib-a".to_owned()],
        });

        lock.write(tmp.path()).unwrap();
        let reparsed = LockFile::read(tmp.path()).unwrap();
        assert_eq!(lock, reparsed);
    }

    #[test]
    fn read_missing_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let err = LockFile::read(tmp.path()).unwrap_err();
        assert!(matches!(err, LockError::Missing { .. }), "was: {err}");
    }

    #[test]
    fn exists_probe() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!LockFile::exists(tmp.path()));
        LockFile::new("0.1.0").write(tmp.path()).unwrap();
        assert!(LockFile::exists(tmp.path()));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        LockFile::new("0.1.0").write(tmp.path()).unwrap();
        assert!(tmp.path().join(LOCK_FILE_NAME).exists());
        assert!(!tmp.path().join("kcjpm.lock.tmp").exists());
    }

    #[test]
    fn schema_version_mismatch_rejected() {
        let content = r#"
version = 99

[metadata]
generated_at = "0"
tool_version = "0.1.0"
"#;
        let err = LockFile::from_toml_str(content, "kcjpm.lock").unwrap_err();
        assert!(
            matches!(
                err,
                LockError::SchemaVersionMismatch {
                    found: 99,
                    expected: LOCK_SCHEMA_VERSION,
                    ..
                }
            ),
            "was: {err}"
        );
    }

    #[test]
    fn duplicate_package_rejected() {
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("dup", "1.0.0", &[]));
        lock.packages.push(locked("dup", "2.0.0", &[]));
        let content = lock.to_toml().unwrap();
        let err = LockFile::from_toml_str(&content, "kcjpm.lock").unwrap_err();
        assert!(err.to_string().contains("duplicate"), "was: {err}");
    }

    #[test]
    fn unknown_dependency_name_rejected() {
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("a", "1.0.0", &["ghost"]));
        let content = lock.to_toml().unwrap();
        let err = LockFile::from_toml_str(&content, "kcjpm.lock").unwrap_err();
        assert!(err.to_string().contains("ghost"), "was: {err}");
    }

    #[test]
    fn unparsable_source_string_rejected() {
        let content = r#"
version = 1

[metadata]
generated_at = "0"
tool_version = "0.1.0"

[[package]]
name = "a"
version = "1.0.0"
source = "svn+https://example.com/repo"
"#;
        let err = LockFile::from_toml_str(content, "kcjpm.lock").unwrap_err();
        assert!(err.to_string().contains("svn+"), "was: {err}");
    }

    #[test]
    fn unknown_field_rejected() {
        let content = r#"
version = 1
bogus = true

[metadata]
generated_at = "0"
tool_version = "0.1.0"
"#;
        let err = LockFile::from_toml_str(content, "kcjpm.lock").unwrap_err();
        assert!(err.to_string().contains("unknown field"), "was: {err}");
    }

    #[test]
    fn validate_in_sync() {
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("lib-a", "1.0.0", &[]));
        let manifest = manifest_with_deps(&[("lib-a", "1.0.0")]);

        let result = lock.validate(&manifest);
        assert!(result.is_valid());
        assert!(!result.has_warnings());
    }

    #[test]
    fn validate_drift_reports_both_names() {
        // S6: lock pins old-pkg, manifest declares new-pkg.
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("old-pkg", "1.0.0", &[]));
        let manifest = manifest_with_deps(&[("new-pkg", "2.0.0")]);

        let result = lock.validate(&manifest);
        assert!(!result.is_valid());
        assert!(result.has_warnings());
        assert!(
            result
                .warnings
                .iter()
                .any(|w| w.contains("new-pkg") && w.contains("old-pkg")),
            "warnings were: {:?}",
            result.warnings
        );
    }

    #[test]
    fn validate_optional_dep_not_required() {
        let lock = LockFile::new("0.1.0");
        let mut manifest = manifest_with_deps(&[]);
        manifest.dependencies.insert(
            "extras".to_owned(),
            DependencySpec::Registry {
                version: "1.0.0".to_owned(),
                registry: "default".to_owned(),
                optional: true,
            },
        );

        let result = lock.validate(&manifest);
        assert!(result.is_valid());
    }

    #[test]
    fn validate_stale_entry_warns_only() {
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("gone", "1.0.0", &[]));
        let manifest = manifest_with_deps(&[]);

        let result = lock.validate(&manifest);
        assert!(result.is_valid());
        assert!(result.has_warnings());
        assert!(
            result.warnings.iter().any(|w| w.contains("gone")),
            "warnings were: {:?}",
            result.warnings
        );
    }

    #[test]
    fn round_trip_is_whitespace_stable() {
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(locked("lib-a", "1.0.0", &[]));
        let once = lock.to_toml().unwrap();
        let reparsed = LockFile::from_toml_str(&once, "kcjpm.lock").unwrap();
        let twice = reparsed.to_toml().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn path_source_round_trips_through_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut lock = LockFile::new("0.1.0");
        lock.packages.push(LockedPackage {
            name: "local".to_owned(),
            version: "0.0.1".to_owned(),
            source: PackageSource::Path {
                path: "../local".to_owned(),
            },
            checksum: None,
            dependencies: Vec::new(),
        });
        lock.write(tmp.path()).unwrap();

        let content = fs::read_to_string(tmp.path().join(LOCK_FILE_NAME)).unwrap();
        assert!(content.contains("path+../local"), "content was: {content}");
        assert_eq!(LockFile::read(tmp.path()).unwrap(), lock);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            #[allow(clippy::unwrap_used)]
            fn lock_file_round_trip(
                names in proptest::collection::btree_set("[a-z][a-z0-9-]{0,12}", 0..5),
                version in "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
            ) {
                let mut lock = LockFile::new("0.1.0");
                for name in &names {
                    lock.packages.push(LockedPackage {
                        name: name.clone(),
                        version: version.clone(),
                        source: PackageSource::Registry {
                            url: "https://repo.example.com".to_owned(),
                        },
                        checksum: None,
                        dependencies: Vec::new(),
                    });
                }
                let content = lock.to_toml().unwrap();
                let reparsed = LockFile::from_toml_str(&content, "kcjpm.lock").unwrap();
                prop_assert_eq!(lock, reparsed);
            }
        }
    }
}
