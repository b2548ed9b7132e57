//! The `cjpm.toml` compatibility dialect.
//!
//! Kebab-case keys and a flatter shape than the native dialect: build options
//! such as `src-dir` and `target-dir` live directly under `[package]`.
//! Unknown keys are silently ignored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::manifest::{
    dependency_from_raw, default_profiles, BuildConfig, Manifest, ManifestError, OutputType,
    Package, RawDependencyTable,
};

/// File name of the foreign manifest dialect.
pub const FOREIGN_MANIFEST_FILE_NAME: &str = "cjpm.toml";

#[derive(Debug, Deserialize)]
struct ForeignManifest {
    package: ForeignPackage,
    #[serde(default)]
    dependencies: BTreeMap<String, ForeignDependency>,
}

#[derive(Debug, Deserialize)]
struct ForeignPackage {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default, rename = "cjc-version")]
    cjc_version: Option<String>,
    #[serde(default, rename = "output-type")]
    output_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "src-dir")]
    src_dir: Option<String>,
    #[serde(default, rename = "target-dir")]
    target_dir: Option<String>,
    // `compile-option` is accepted but has no counterpart in the canonical
    // model; it is dropped like any other unknown key.
    #[serde(default, rename = "compile-option")]
    _compile_option: Option<String>,
    #[serde(default, rename = "package-configuration")]
    package_configuration: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ForeignDependency {
    Shorthand(String),
    Table(ForeignDependencyTable),
}

/// Same fields as the native dependency table, but tolerant of unknown keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ForeignDependencyTable {
    version: Option<String>,
    path: Option<String>,
    git: Option<String>,
    tag: Option<String>,
    branch: Option<String>,
    commit: Option<String>,
    registry: Option<String>,
    optional: bool,
}

impl ForeignDependencyTable {
    fn into_raw(self) -> RawDependencyTable {
        RawDependencyTable {
            version: self.version,
            path: self.path,
            git: self.git,
            tag: self.tag,
            branch: self.branch,
            commit: self.commit,
            registry: self.registry,
            optional: self.optional,
        }
    }
}

/// Read and parse a foreign `cjpm.toml` manifest into the canonical model.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or if a dependency
/// is malformed.
pub fn from_path(path: &Path) -> Result<Manifest, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    from_str(&content, &path.display().to_string())
}

/// Parse a foreign-dialect manifest from a TOML string.
///
/// # Errors
/// Returns an error if the string contains invalid TOML, declares a malformed
/// dependency, or fails validation.
pub fn from_str(content: &str, path: &str) -> Result<Manifest, ManifestError> {
    let raw: ForeignManifest = toml::from_str(content).map_err(|e| ManifestError::Parse {
        path: path.to_owned(),
        source: e,
    })?;

    let mut dependencies = BTreeMap::new();
    for (name, dep) in raw.dependencies {
        let table = match dep {
            ForeignDependency::Shorthand(version) => RawDependencyTable {
                version: Some(version),
                ..RawDependencyTable::default()
            },
            ForeignDependency::Table(table) => table.into_raw(),
        };
        dependencies.insert(name.clone(), dependency_from_raw(&name, &table)?);
    }

    let defaults = BuildConfig::default();
    let manifest = Manifest {
        package: Package {
            name: raw.package.name,
            version: raw.package.version.unwrap_or_else(|| "0.1.0".to_owned()),
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
        build: BuildConfig {
            source_dir: raw.package.src_dir.unwrap_or(defaults.source_dir),
            output_dir: raw.package.target_dir.unwrap_or(defaults.output_dir),
            ..defaults
        },
        profiles: default_profiles(),
        registry: None,
        workspace: None,
        package_configuration: raw.package.package_configuration,
    };
    crate::manifest::validate(&manifest, path)?;
    Ok(manifest)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use crate::manifest::DependencySpec;
    use crate::source::GitReference;

    use super::*;

    #[test]
    fn parse_foreign_manifest() {
        let toml = r#"
[package]
name = "legacy-app"
version = "1.0.0"
cjc-version = "0.53.4"
output-type = "executable"
src-dir = "sources"
target-dir = "build"
"#;
        let manifest = from_str(toml, "cjpm.toml").unwrap();
        assert_eq!(manifest.package.name, "legacy-app");
        assert_eq!(manifest.package.cjc_version.as_deref(), Some("0.53.4"));
        assert_eq!(manifest.package.output_type, OutputType::Executable);
        assert_eq!(manifest.build.source_dir, "sources");
        assert_eq!(manifest.build.output_dir, "build");
    }

    #[test]
    fn unknown_keys_ignored() {
        let toml = r#"
[package]
name = "legacy-app"
mystery-key = "whatever"

[some-unknown-table]
x = 1
"#;
        let manifest = from_str(toml, "cjpm.toml").unwrap();
        assert_eq!(manifest.package.name, "legacy-app");
    }

    #[test]
    fn missing_version_defaults() {
        let manifest = from_str("[package]\nname = \"legacy\"\n", "cjpm.toml").unwrap();
        assert_eq!(manifest.package.version, "0.1.0");
    }

    #[test]
    fn build_dirs_default_when_absent() {
        let manifest = from_str("[package]\nname = \"legacy\"\n", "cjpm.toml").unwrap();
        assert_eq!(manifest.build.source_dir, "src");
        assert_eq!(manifest.build.output_dir, "target");
    }

    #[test]
    fn dependencies_converted() {
        let toml = r#"
[package]
name = "legacy-app"

[dependencies]
json = "1.2.0"
util = { path = "../util" }
net = { git = "https://github.com/u/net", tag = "v1.0.0" }
"#;
        let manifest = from_str(toml, "cjpm.toml").unwrap();
        assert_eq!(manifest.dependencies.len(), 3);
        match manifest.dependencies.get("net").unwrap() {
            DependencySpec::Git { reference, .. } => {
                assert_eq!(reference, &GitReference::Tag("v1.0.0".to_owned()));
            }
            other => panic!("expected git dep, got {other:?}"),
        }
    }

    #[test]
    fn unknown_dependency_keys_ignored() {
        let toml = r#"
[package]
name = "legacy-app"

[dependencies]
util = { path = "../util", future-flag = true }
"#;
        let manifest = from_str(toml, "cjpm.toml").unwrap();
        assert!(matches!(
            manifest.dependencies.get("util").unwrap(),
            DependencySpec::Path { .. }
        ));
    }

    #[test]
    fn malformed_dependency_still_rejected() {
        let toml = r#"
[package]
name = "legacy-app"

[dependencies]
bad = { optional = true }
"#;
        let err = from_str(toml, "cjpm.toml").unwrap_err();
        assert!(err.to_string().contains("bad"), "was: {err}");
    }

    #[test]
    fn package_configuration_preserved() {
        let toml = r#"
[package]
name = "legacy-app"

[package.package-configuration]
custom-key = "custom-value"
"#;
        let manifest = from_str(toml, "cjpm.toml").unwrap();
        assert_eq!(
            manifest.package_configuration.get("custom-key").map(String::as_str),
            Some("custom-value")
        );
    }

    #[test]
    fn profiles_are_the_builtins() {
        let manifest = from_str("[package]\nname = \"legacy\"\n", "cjpm.toml").unwrap();
        assert!(manifest.profiles.contains_key("debug"));
        assert!(manifest.profiles.contains_key("release"));
        assert!(manifest.profiles.contains_key("release-lto"));
    }
}
