//! Dependency fetchers: materialize one source variant into the local cache.

use std::path::{Path, PathBuf};

use kcjpm_config::manifest::DependencySpec;
use kcjpm_util::fs::FileSystem;
use kcjpm_util::process::ProcessExecutor;

use crate::error::EngineError;
use crate::git::GitFetcher;
use crate::registry::{HttpClient, RegistryFetcher};

/// How much work a fetch is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Check accessibility only (path existence, `git ls-remote`, registry
    /// metadata probe); do not populate the cache.
    Validate,
    /// Fully materialize the dependency.
    Install,
}

/// Capabilities and settings shared by all fetchers.
pub struct FetchContext<'a> {
    pub project_root: &'a Path,
    pub cache_root: &'a Path,
    pub fs: &'a dyn FileSystem,
    pub executor: &'a dyn ProcessExecutor,
    pub http: &'a dyn HttpClient,
    pub mode: FetchMode,
}

/// Where a fetched dependency landed, plus acquisition metadata.
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Directory containing the dependency's project tree.
    pub location: PathBuf,
    /// For git dependencies: the commit the checkout resolved to.
    pub resolved_commit: Option<String>,
    /// For registry dependencies: the verified archive checksum (hex).
    pub checksum: Option<String>,
    /// For registry dependencies: the registry the package came from.
    pub registry_url: Option<String>,
}

/// A fetcher for one source variant. Selection normally happens by pattern
/// match on the spec ([`fetch_dependency`]); the `supports` probe remains for
/// callers iterating over fetchers.
pub trait DependencyFetcher {
    fn supports(&self, spec: &DependencySpec) -> bool;

    /// Materialize `spec` into the cache (idempotent) and return its location.
    ///
    /// `parent_root` is the project root of the declaring manifest; path
    /// dependencies resolve relative to it.
    ///
    /// # Errors
    /// Returns a dependency error specific to the source variant.
    fn fetch(
        &self,
        name: &str,
        spec: &DependencySpec,
        parent_root: &Path,
        ctx: &FetchContext<'_>,
    ) -> Result<Fetched, EngineError>;
}

/// Dispatch to the fetcher matching the spec's variant.
///
/// Registry specs must carry a literal registry URL at this point; named
/// registries are resolved by the dependency resolver before fetching.
///
/// # Errors
/// Propagates the selected fetcher's error.
pub fn fetch_dependency(
    name: &str,
    spec: &DependencySpec,
    parent_root: &Path,
    ctx: &FetchContext<'_>,
) -> Result<Fetched, EngineError> {
    match spec {
        DependencySpec::Path { .. } => PathFetcher.fetch(name, spec, parent_root, ctx),
        DependencySpec::Git { .. } => GitFetcher.fetch(name, spec, parent_root, ctx),
        DependencySpec::Registry { .. } => RegistryFetcher.fetch(name, spec, parent_root, ctx),
    }
}

/// Resolves path dependencies relative to the declaring project root.
#[derive(Debug, Default, Clone, Copy)]
pub struct PathFetcher;

impl DependencyFetcher for PathFetcher {
    fn supports(&self, spec: &DependencySpec) -> bool {
        matches!(spec, DependencySpec::Path { .. })
    }

    fn fetch(
        &self,
        name: &str,
        spec: &DependencySpec,
        parent_root: &Path,
        ctx: &FetchContext<'_>,
    ) -> Result<Fetched, EngineError> {
        let DependencySpec::Path { path, .. } = spec else {
            return Err(EngineError::DependencyNotFound {
                name: name.to_owned(),
                location: "<not a path dependency>".to_owned(),
            });
        };

        let resolved = kcjpm_util::fs::normalize(&parent_root.join(path));
        if !ctx.fs.is_dir(&resolved) {
            return Err(EngineError::PathNotFound {
                name: name.to_owned(),
                path: resolved.display().to_string(),
            });
        }
        Ok(Fetched {
            location: resolved,
            resolved_commit: None,
            checksum: None,
            registry_url: None,
        })
    }
}
