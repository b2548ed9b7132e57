//! The canonical project manifest and the native `kcjpm.toml` dialect.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::source::GitReference;

/// File name of the native manifest dialect.
pub const MANIFEST_FILE_NAME: &str = "kcjpm.toml";

/// The canonical in-memory project declaration, produced by both dialects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub package: Package,
    pub dependencies: BTreeMap<String, DependencySpec>,
    pub build: BuildConfig,
    pub profiles: BTreeMap<String, Profile>,
    pub registry: Option<RegistryConfig>,
    pub workspace: Option<WorkspaceConfig>,
    /// Opaque configuration carried over from the foreign dialect; unused by
    /// the core but preserved across round trips.
    pub package_configuration: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub cjc_version: Option<String>,
    pub output_type: OutputType,
    pub description: Option<String>,
}

/// What the compiler is asked to produce for this project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputType {
    #[default]
    Executable,
    Library,
    StaticLibrary,
    DynamicLibrary,
}

impl OutputType {
    /// Parse an output type, case-insensitively, accepting common aliases.
    /// Unrecognized values default to `Executable`.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "library" | "lib" => OutputType::Library,
            "static" | "static-library" | "staticlib" => OutputType::StaticLibrary,
            "dynamic" | "dynamic-library" | "dylib" => OutputType::DynamicLibrary,
            _ => OutputType::Executable,
        }
    }

    /// The canonical manifest spelling.
    pub fn as_manifest_str(self) -> &'static str {
        match self {
            OutputType::Executable => "executable",
            OutputType::Library => "library",
            OutputType::StaticLibrary => "static-library",
            OutputType::DynamicLibrary => "dynamic-library",
        }
    }
}

/// One declared dependency. Exactly one source variant applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencySpec {
    /// A directory relative to the declaring project's root.
    Path {
        version: Option<String>,
        path: String,
        optional: bool,
    },
    /// A git repository pinned to a tag, branch, or commit.
    Git {
        version: Option<String>,
        url: String,
        reference: GitReference,
        optional: bool,
    },
    /// A versioned package from a named registry (`default`, `private`, or a
    /// literal URL).
    Registry {
        version: String,
        registry: String,
        optional: bool,
    },
}

impl DependencySpec {
    pub fn optional(&self) -> bool {
        match self {
            DependencySpec::Path { optional, .. }
            | DependencySpec::Git { optional, .. }
            | DependencySpec::Registry { optional, .. } => *optional,
        }
    }

    /// The version string the declarant asked for, if any.
    pub fn declared_version(&self) -> Option<&str> {
        match self {
            DependencySpec::Path { version, .. } | DependencySpec::Git { version, .. } => {
                version.as_deref()
            }
            DependencySpec::Registry { version, .. } => Some(version),
        }
    }
}

/// Build options with their defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub source_dir: String,
    pub output_dir: String,
    pub parallel: bool,
    pub incremental: bool,
    pub jobs: Option<usize>,
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            source_dir: "src".to_owned(),
            output_dir: "target".to_owned(),
            parallel: true,
            incremental: true,
            jobs: None,
            verbose: false,
        }
    }
}

impl BuildConfig {
    /// The number of parallel compile jobs: the declared count, or the host
    /// CPU count when unset.
    pub fn effective_jobs(&self) -> usize {
        self.jobs.filter(|j| *j > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}

/// A named set of compiler options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// 0..=3, passed as `-O<level>`.
    pub optimization_level: u8,
    pub debug_info: bool,
    pub lto: bool,
}

/// The built-in profiles present when the manifest declares none.
pub fn default_profiles() -> BTreeMap<String, Profile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "debug".to_owned(),
        Profile {
            optimization_level: 0,
            debug_info: true,
            lto: false,
        },
    );
    profiles.insert(
        "release".to_owned(),
        Profile {
            optimization_level: 2,
            debug_info: false,
            lto: false,
        },
    );
    profiles.insert(
        "release-lto".to_owned(),
        Profile {
            optimization_level: 3,
            debug_info: false,
            lto: true,
        },
    );
    profiles
}

/// Named registry endpoints referenced by registry dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<String>,
}

/// Workspace member globs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_members: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid manifest at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("cannot serialize manifest: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("invalid manifest at {path}: {message}")]
    Validation { path: String, message: String },
    #[error("invalid dependency `{name}`: {message}")]
    DependencyConfig { name: String, message: String },
    #[error("no kcjpm.toml or cjpm.toml found in {path}")]
    MissingManifest { path: String },
}

// ---------------------------------------------------------------------------
// Native dialect wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    package: RawPackage,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    dependencies: BTreeMap<String, RawDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build: Option<RawBuild>,
    #[serde(default, rename = "profile", skip_serializing_if = "BTreeMap::is_empty")]
    profiles: BTreeMap<String, RawProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    registry: Option<RegistryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    workspace: Option<WorkspaceConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    package_configuration: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    name: String,
    version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cjc_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawDependency {
    /// `name = "1.2.0"` — registry shorthand.
    Shorthand(String),
    Table(RawDependencyTable),
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct RawDependencyTable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) git: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) registry: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub(crate) optional: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawBuild {
    #[serde(skip_serializing_if = "Option::is_none")]
    source_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    incremental: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    jobs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbose: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    optimization_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_info: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lto: Option<bool>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert one raw dependency value into the canonical spec, enforcing that
/// exactly one source variant is declared.
pub(crate) fn dependency_from_raw(
    name: &str,
    raw: &RawDependencyTable,
) -> Result<DependencySpec, ManifestError> {
    let config_err = |message: &str| ManifestError::DependencyConfig {
        name: name.to_owned(),
        message: message.to_owned(),
    };

    if raw.path.is_some() && raw.git.is_some() {
        return Err(config_err("declares both `path` and `git`"));
    }

    let git_ref_keys = [&raw.tag, &raw.branch, &raw.commit]
        .iter()
        .filter(|v| v.is_some())
        .count();

    if let Some(url) = &raw.git {
        if git_ref_keys > 1 {
            return Err(config_err(
                "declares more than one of `tag`, `branch`, `commit`",
            ));
        }
        if raw.registry.is_some() {
            return Err(config_err("`registry` is not valid for a git dependency"));
        }
        let reference = if let Some(tag) = &raw.tag {
            GitReference::Tag(tag.clone())
        } else if let Some(branch) = &raw.branch {
            GitReference::Branch(branch.clone())
        } else if let Some(commit) = &raw.commit {
            GitReference::Commit(commit.clone())
        } else {
            GitReference::default_branch()
        };
        return Ok(DependencySpec::Git {
            version: raw.version.clone(),
            url: url.clone(),
            reference,
            optional: raw.optional,
        });
    }

    if let Some(path) = &raw.path {
        if git_ref_keys > 0 {
            return Err(config_err(
                "`tag`, `branch`, and `commit` are not valid for a path dependency",
            ));
        }
        if raw.registry.is_some() {
            return Err(config_err("`registry` is not valid for a path dependency"));
        }
        return Ok(DependencySpec::Path {
            version: raw.version.clone(),
            path: path.clone(),
            optional: raw.optional,
        });
    }

    if git_ref_keys > 0 {
        return Err(config_err("declares a git ref without a `git` url"));
    }

    let Some(version) = &raw.version else {
        return Err(config_err("must declare a version, a path, or a git source"));
    };
    Ok(DependencySpec::Registry {
        version: version.clone(),
        registry: raw.registry.clone().unwrap_or_else(|| "default".to_owned()),
        optional: raw.optional,
    })
}

fn dependency_to_raw(spec: &DependencySpec) -> RawDependency {
    match spec {
        DependencySpec::Registry {
            version,
            registry,
            optional,
        } if registry == "default" && !*optional => RawDependency::Shorthand(version.clone()),
        DependencySpec::Registry {
            version,
            registry,
            optional,
        } => RawDependency::Table(RawDependencyTable {
            version: Some(version.clone()),
            registry: (registry != "default").then(|| registry.clone()),
            optional: *optional,
            ..RawDependencyTable::default()
        }),
        DependencySpec::Path {
            version,
            path,
            optional,
        } => RawDependency::Table(RawDependencyTable {
            version: version.clone(),
            path: Some(path.clone()),
            optional: *optional,
            ..RawDependencyTable::default()
        }),
        DependencySpec::Git {
            version,
            url,
            reference,
            optional,
        } => {
            let mut table = RawDependencyTable {
                version: version.clone(),
                git: Some(url.clone()),
                optional: *optional,
                ..RawDependencyTable::default()
            };
            match reference {
                GitReference::Tag(v) => table.tag = Some(v.clone()),
                GitReference::Branch(v) => table.branch = Some(v.clone()),
                GitReference::Commit(v) => table.commit = Some(v.clone()),
            }
            RawDependency::Table(table)
        }
    }
}

fn build_from_raw(raw: Option<RawBuild>) -> BuildConfig {
    let raw = raw.unwrap_or_default();
    let defaults = BuildConfig::default();
    BuildConfig {
        source_dir: raw.source_dir.unwrap_or(defaults.source_dir),
        output_dir: raw.output_dir.unwrap_or(defaults.output_dir),
        parallel: raw.parallel.unwrap_or(defaults.parallel),
        incremental: raw.incremental.unwrap_or(defaults.incremental),
        jobs: raw.jobs,
        verbose: raw.verbose.unwrap_or(defaults.verbose),
    }
}

fn profiles_from_raw(
    raw: &BTreeMap<String, RawProfile>,
    path: &str,
) -> Result<BTreeMap<String, Profile>, ManifestError> {
    // Declared profiles override the built-ins field by field; the built-ins
    // remain available even when only one profile is customized.
    let mut profiles = default_profiles();
    for (name, raw_profile) in raw {
        let base = profiles.get(name).cloned().unwrap_or(Profile {
            optimization_level: 0,
            debug_info: false,
            lto: false,
        });
        let profile = Profile {
            optimization_level: raw_profile.optimization_level.unwrap_or(base.optimization_level),
            debug_info: raw_profile.debug_info.unwrap_or(base.debug_info),
            lto: raw_profile.lto.unwrap_or(base.lto),
        };
        if profile.optimization_level > 3 {
            return Err(ManifestError::Validation {
                path: path.to_owned(),
                message: format!(
                    "profile `{name}` has optimization_level {} (must be 0..=3)",
                    profile.optimization_level
                ),
            });
        }
        profiles.insert(name.clone(), profile);
    }
    Ok(profiles)
}

pub(crate) fn validate(manifest: &Manifest, path: &str) -> Result<(), ManifestError> {
    let name = &manifest.package.name;
    if name.is_empty() {
        return Err(ManifestError::Validation {
            path: path.to_owned(),
            message: "package name must not be empty".to_owned(),
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ManifestError::Validation {
            path: path.to_owned(),
            message: format!(
                "package name `{name}` contains invalid characters (only alphanumeric, hyphen, underscore allowed)"
            ),
        });
    }
    Ok(())
}

impl Manifest {
    /// Read and parse a native `kcjpm.toml` manifest.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, contains invalid TOML,
    /// has unknown keys, or fails validation.
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_str(&content, &path.display().to_string())
    }

    /// Parse a native-dialect manifest from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the string contains invalid TOML, has unknown
    /// keys, declares a malformed dependency, or fails validation.
    pub fn from_str(content: &str, path: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(content).map_err(|e| ManifestError::Parse {
            path: path.to_owned(),
            source: e,
        })?;

        let mut dependencies = BTreeMap::new();
        for (name, raw_dep) in &raw.dependencies {
            let spec = match raw_dep {
                RawDependency::Shorthand(version) => DependencySpec::Registry {
                    version: version.clone(),
                    registry: "default".to_owned(),
                    optional: false,
                },
                RawDependency::Table(table) => dependency_from_raw(name, table)?,
            };
            dependencies.insert(name.clone(), spec);
        }

        let manifest = Manifest {
            package: Package {
                name: raw.package.name,
                version: raw.package.version,
                cjc_version: raw.package.cjc_version,
                output_type: raw
                    .package
                    .output_type
                    .as_deref()
                    .map(OutputType::parse)
                    .unwrap_or_default(),
                description: raw.package.description,
            },
            dependencies,
            build: build_from_raw(raw.build),
            profiles: profiles_from_raw(&raw.profiles, path)?,
            registry: raw.registry,
            workspace: raw.workspace,
            package_configuration: raw.package_configuration,
        };
        validate(&manifest, path)?;
        Ok(manifest)
    }

    /// Serialize to the native dialect.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ManifestError> {
        let raw = RawManifest {
            package: RawPackage {
                name: self.package.name.clone(),
                version: self.package.version.clone(),
                cjc_version: self.package.cjc_version.clone(),
                output_type: Some(self.package.output_type.as_manifest_str().to_owned()),
                description: self.package.description.clone(),
            },
            dependencies: self
                .dependencies
                .iter()
                .map(|(name, spec)| (name.clone(), dependency_to_raw(spec)))
                .collect(),
            build: Some(RawBuild {
                source_dir: Some(self.build.source_dir.clone()),
                output_dir: Some(self.build.output_dir.clone()),
                parallel: Some(self.build.parallel),
                incremental: Some(self.build.incremental),
                jobs: self.build.jobs,
                verbose: Some(self.build.verbose),
            }),
            profiles: self
                .profiles
                .iter()
                .map(|(name, profile)| {
                    (
                        name.clone(),
                        RawProfile {
                            optimization_level: Some(profile.optimization_level),
                            debug_info: Some(profile.debug_info),
                            lto: Some(profile.lto),
                        },
                    )
                })
                .collect(),
            registry: self.registry.clone(),
            workspace: self.workspace.clone(),
            package_configuration: self.package_configuration.clone(),
        };
        toml::to_string_pretty(&raw).map_err(|e| ManifestError::Serialize { source: e })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    const PACKAGE: &str = "[package]\nname = \"my-app\"\nversion = \"0.1.0\"\n";

    #[test]
    fn parse_minimal_manifest() {
        let manifest = Manifest::from_str(PACKAGE, "kcjpm.toml").unwrap();
        assert_eq!(manifest.package.name, "my-app");
        assert_eq!(manifest.package.version, "0.1.0");
        assert_eq!(manifest.package.output_type, OutputType::Executable);
        assert!(manifest.dependencies.is_empty());
        assert_eq!(manifest.build, BuildConfig::default());
    }

    #[test]
    fn default_profiles_present_when_undeclared() {
        let manifest = Manifest::from_str(PACKAGE, "kcjpm.toml").unwrap();
        assert_eq!(manifest.profiles.len(), 3);
        let debug = manifest.profiles.get("debug").unwrap();
        assert_eq!(debug.optimization_level, 0);
        assert!(debug.debug_info);
        assert!(!debug.lto);
        let release = manifest.profiles.get("release").unwrap();
        assert_eq!(release.optimization_level, 2);
        assert!(!release.debug_info);
        assert!(!release.lto);
        let lto = manifest.profiles.get("release-lto").unwrap();
        assert_eq!(lto.optimization_level, 3);
        assert!(lto.lto);
    }

    #[test]
    fn declared_profile_overrides_builtin() {
        let toml = format!("{PACKAGE}\n[profile.release]\noptimization_level = 3\n");
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        let release = manifest.profiles.get("release").unwrap();
        assert_eq!(release.optimization_level, 3);
        assert!(!release.debug_info); // untouched fields keep the builtin value
    }

    #[test]
    fn out_of_range_optimization_rejected() {
        let toml = format!("{PACKAGE}\n[profile.fast]\noptimization_level = 9\n");
        let err = Manifest::from_str(&toml, "kcjpm.toml").unwrap_err();
        assert!(err.to_string().contains("0..=3"), "was: {err}");
    }

    #[test]
    fn version_shorthand_is_registry_dep() {
        let toml = format!("{PACKAGE}\n[dependencies]\njson = \"1.2.0\"\n");
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        assert_eq!(
            manifest.dependencies.get("json").unwrap(),
            &DependencySpec::Registry {
                version: "1.2.0".to_owned(),
                registry: "default".to_owned(),
                optional: false,
            }
        );
    }

    #[test]
    fn path_dependency() {
        let toml = format!("{PACKAGE}\n[dependencies]\nutil = {{ path = \"../util\" }}\n");
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        assert_eq!(
            manifest.dependencies.get("util").unwrap(),
            &DependencySpec::Path {
                version: None,
                path: "../util".to_owned(),
                optional: false,
            }
        );
    }

    #[test]
    fn git_dependency_with_tag() {
        let toml = format!(
            "{PACKAGE}\n[dependencies]\nnet = {{ git = \"https://github.com/u/net\", tag = \"v1.0.0\" }}\n"
        );
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        assert_eq!(
            manifest.dependencies.get("net").unwrap(),
            &DependencySpec::Git {
                version: None,
                url: "https://github.com/u/net".to_owned(),
                reference: GitReference::Tag("v1.0.0".to_owned()),
                optional: false,
            }
        );
    }

    #[test]
    fn git_dependency_defaults_to_main_branch() {
        let toml = format!("{PACKAGE}\n[dependencies]\nnet = {{ git = \"https://github.com/u/net\" }}\n");
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        match manifest.dependencies.get("net").unwrap() {
            DependencySpec::Git { reference, .. } => {
                assert_eq!(reference, &GitReference::Branch("main".to_owned()));
            }
            other => panic!("expected git dep, got {other:?}"),
        }
    }

    #[test]
    fn optional_dependency_flag() {
        let toml = format!("{PACKAGE}\n[dependencies]\nextras = {{ version = \"2.0\", optional = true }}\n");
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        assert!(manifest.dependencies.get("extras").unwrap().optional());
    }

    #[test]
    fn dependency_with_path_and_git_rejected() {
        let toml = format!(
            "{PACKAGE}\n[dependencies]\nbad = {{ path = \"../x\", git = \"https://github.com/u/x\" }}\n"
        );
        let err = Manifest::from_str(&toml, "kcjpm.toml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad"), "was: {msg}");
        assert!(msg.contains("path") && msg.contains("git"), "was: {msg}");
    }

    #[test]
    fn dependency_with_no_source_rejected() {
        let toml = format!("{PACKAGE}\n[dependencies]\nbad = {{ optional = true }}\n");
        let err = Manifest::from_str(&toml, "kcjpm.toml").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bad"), "was: {msg}");
        assert!(msg.contains("version, a path, or a git source"), "was: {msg}");
    }

    #[test]
    fn git_ref_without_git_url_rejected() {
        let toml = format!("{PACKAGE}\n[dependencies]\nbad = {{ version = \"1.0\", tag = \"v1\" }}\n");
        let err = Manifest::from_str(&toml, "kcjpm.toml").unwrap_err();
        assert!(err.to_string().contains("git"), "was: {err}");
    }

    #[test]
    fn two_git_refs_rejected() {
        let toml = format!(
            "{PACKAGE}\n[dependencies]\nbad = {{ git = \"https://github.com/u/x\", tag = \"v1\", branch = \"dev\" }}\n"
        );
        assert!(Manifest::from_str(&toml, "kcjpm.toml").is_err());
    }

    #[test]
    fn output_type_aliases() {
        for (value, expected) in [
            ("executable", OutputType::Executable),
            ("exe", OutputType::Executable),
            ("EXE", OutputType::Executable),
            ("library", OutputType::Library),
            ("lib", OutputType::Library),
            ("static", OutputType::StaticLibrary),
            ("static-library", OutputType::StaticLibrary),
            ("staticlib", OutputType::StaticLibrary),
            ("dynamic", OutputType::DynamicLibrary),
            ("dynamic-library", OutputType::DynamicLibrary),
            ("DyLib", OutputType::DynamicLibrary),
            ("something-else", OutputType::Executable),
        ] {
            assert_eq!(OutputType::parse(value), expected, "value: {value}");
        }
    }

    #[test]
    fn build_section_overrides_defaults() {
        let toml = format!(
            "{PACKAGE}\n[build]\nsource_dir = \"code\"\noutput_dir = \"out\"\nparallel = false\njobs = 2\n"
        );
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        assert_eq!(manifest.build.source_dir, "code");
        assert_eq!(manifest.build.output_dir, "out");
        assert!(!manifest.build.parallel);
        assert!(manifest.build.incremental); // untouched default
        assert_eq!(manifest.build.jobs, Some(2));
    }

    #[test]
    fn registry_section_parsed() {
        let toml = format!(
            "{PACKAGE}\n[registry]\ndefault = \"https://repo.example.com\"\nprivate = \"https://internal.example.com\"\n"
        );
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        let registry = manifest.registry.unwrap();
        assert_eq!(registry.default.as_deref(), Some("https://repo.example.com"));
        assert_eq!(
            registry.private.as_deref(),
            Some("https://internal.example.com")
        );
    }

    #[test]
    fn workspace_section_parsed() {
        let toml = format!("{PACKAGE}\n[workspace]\nmembers = [\"libs/*\"]\n");
        let manifest = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        assert_eq!(manifest.workspace.unwrap().members, vec!["libs/*"]);
    }

    #[test]
    fn reject_empty_name() {
        let err =
            Manifest::from_str("[package]\nname = \"\"\nversion = \"0.1.0\"\n", "kcjpm.toml")
                .unwrap_err();
        assert!(err.to_string().contains("empty"), "was: {err}");
    }

    #[test]
    fn reject_invalid_name_chars() {
        let err = Manifest::from_str(
            "[package]\nname = \"my app!\"\nversion = \"0.1.0\"\n",
            "kcjpm.toml",
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid characters"), "was: {err}");
    }

    #[test]
    fn reject_unknown_keys() {
        let toml = format!("{PACKAGE}unknown_field = true\n");
        assert!(Manifest::from_str(&toml, "kcjpm.toml").is_err());
    }

    #[test]
    fn reject_malformed_toml() {
        assert!(Manifest::from_str("[package\nname=", "kcjpm.toml").is_err());
    }

    #[test]
    fn round_trip_full_manifest() {
        let toml = format!(
            r#"{PACKAGE}cjc_version = "0.53.4"
output_type = "library"
description = "a sample"

[dependencies]
json = "1.2.0"
util = {{ path = "../util", version = "0.3.0" }}
net = {{ git = "https://github.com/u/net", branch = "dev", optional = true }}
secret = {{ version = "0.9.1", registry = "private" }}

[build]
jobs = 4

[profile.release]
lto = true

[registry]
private = "https://internal.example.com"

[workspace]
members = ["libs/*"]
"#
        );
        let original = Manifest::from_str(&toml, "kcjpm.toml").unwrap();
        let serialized = original.to_toml().unwrap();
        let reparsed = Manifest::from_str(&serialized, "kcjpm.toml").unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn effective_jobs_prefers_declared_count() {
        let build = BuildConfig {
            jobs: Some(3),
            ..BuildConfig::default()
        };
        assert_eq!(build.effective_jobs(), 3);
        let unset = BuildConfig::default();
        assert!(unset.effective_jobs() >= 1);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_dep() -> impl Strategy<Value = DependencySpec> {
            let version = "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}";
            prop_oneof![
                (version, any::<bool>()).prop_map(|(version, optional)| {
                    DependencySpec::Registry {
                        version,
                        registry: "default".to_owned(),
                        optional,
                    }
                }),
                ("[a-z][a-z0-9/-]{0,15}", any::<bool>()).prop_map(|(path, optional)| {
                    DependencySpec::Path {
                        version: None,
                        path,
                        optional,
                    }
                }),
                ("[a-z][a-z0-9-]{0,10}", any::<bool>()).prop_map(|(branch, optional)| {
                    DependencySpec::Git {
                        version: None,
                        url: "https://github.com/u/r".to_owned(),
                        reference: GitReference::Branch(branch),
                        optional,
                    }
                }),
            ]
        }

        proptest! {
            #[test]
            #[allow(clippy::unwrap_used)]
            fn manifest_round_trip(
                name in "[a-zA-Z][a-zA-Z0-9_-]{0,20}",
                version in "[0-9]{1,2}\\.[0-9]{1,2}\\.[0-9]{1,2}",
                deps in proptest::collection::btree_map("[a-z][a-z0-9-]{0,12}", arb_dep(), 0..4),
            ) {
                let original = Manifest {
                    package: Package {
                        name,
                        version,
                        cjc_version: None,
                        output_type: OutputType::Executable,
                        description: None,
                    },
                    dependencies: deps,
                    build: BuildConfig::default(),
                    profiles: default_profiles(),
                    registry: None,
                    workspace: None,
                    package_configuration: BTreeMap::new(),
                };
                let serialized = original.to_toml().unwrap();
                let reparsed = Manifest::from_str(&serialized, "kcjpm.toml").unwrap();
                prop_assert_eq!(original, reparsed);
            }
        }
    }
}
