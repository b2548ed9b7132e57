//! The immutable compilation context assembled once per build.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kcjpm_cjc::invoke::CjcLocator;
use kcjpm_config::manifest::{BuildConfig, Manifest, OutputType, Profile};
use kcjpm_targets::{host_target, Target};
use kcjpm_util::fs::{FileSystem, HostFileSystem};
use kcjpm_util::process::{HostProcessExecutor, ProcessExecutor};

use crate::discover::PackageInfo;
use crate::error::EngineError;
use crate::registry::{HttpClient, UreqClient};
use crate::resolve::ResolvedDependency;

/// Caller-supplied settings for context assembly.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Profile name; defaults to `release`.
    pub profile: String,
    /// Explicit target triple; `None` builds for the host.
    pub target: Option<String>,
    /// Locator for the `cjc` binary (discovery happens outside the core).
    pub compiler: CjcLocator,
    /// Override of the shared cache root (defaults to `~/.kcjpm/cache`).
    pub cache_root: Option<PathBuf>,
}

impl ContextOptions {
    pub fn new(compiler: CjcLocator) -> Self {
        Self {
            profile: "release".to_owned(),
            target: None,
            compiler,
            cache_root: None,
        }
    }
}

/// Everything one pipeline run needs, assembled up front.
///
/// The resolution and discovery stages fill `resolved_dependencies` and
/// `packages`; from the compile stage onward the context is treated as
/// immutable.
#[derive(Debug, Clone)]
pub struct CompilationContext {
    pub project_root: PathBuf,
    pub manifest: Manifest,
    /// Build options with defaults applied (copied out of the manifest).
    pub build: BuildConfig,
    pub profile_name: String,
    pub profile: Profile,
    pub output_type: OutputType,
    pub source_dir: PathBuf,
    /// `<project_root>/<output_dir>/<profile>`.
    pub output_path: PathBuf,
    /// Explicit cross-compilation target; `None` means host.
    pub target: Option<Target>,
    /// Parallel compile jobs.
    pub jobs: usize,
    pub cache_root: PathBuf,
    pub compiler: CjcLocator,
    pub resolved_dependencies: Vec<ResolvedDependency>,
    pub packages: Vec<PackageInfo>,
    pub fs: Arc<dyn FileSystem>,
    pub executor: Arc<dyn ProcessExecutor>,
    pub http: Arc<dyn HttpClient>,
}

impl CompilationContext {
    /// Load the project manifest from `project_root` and assemble a context
    /// with the host capability implementations.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be loaded, the profile is
    /// unknown, or the target string is invalid.
    pub fn assemble(project_root: &Path, options: ContextOptions) -> Result<Self, EngineError> {
        Self::assemble_with(
            project_root,
            options,
            Arc::new(HostFileSystem),
            Arc::new(HostProcessExecutor),
            Arc::new(UreqClient::default()),
        )
    }

    /// Like [`CompilationContext::assemble`] with injected capabilities, for
    /// tests and embedders.
    ///
    /// # Errors
    /// Returns an error if the manifest cannot be loaded, the profile is
    /// unknown, or the target string is invalid.
    pub fn assemble_with(
        project_root: &Path,
        options: ContextOptions,
        fs: Arc<dyn FileSystem>,
        executor: Arc<dyn ProcessExecutor>,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, EngineError> {
        let manifest = kcjpm_config::dialect::load_from_project_root(project_root)?;

        let profile = manifest
            .profiles
            .get(&options.profile)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProfile {
                name: options.profile.clone(),
                available: manifest
                    .profiles
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })?;

        let target = options
            .target
            .as_deref()
            .map(str::parse::<Target>)
            .transpose()?;

        let cache_root = match options.cache_root {
            Some(root) => root,
            None => crate::cache::default_cache_root()?,
        };

        let build = manifest.build.clone();
        let source_dir = project_root.join(&build.source_dir);
        let output_path = project_root.join(&build.output_dir).join(&options.profile);
        let jobs = build.effective_jobs();
        let output_type = manifest.package.output_type;

        Ok(Self {
            project_root: project_root.to_path_buf(),
            manifest,
            build,
            profile_name: options.profile,
            profile,
            output_type,
            source_dir,
            output_path,
            target,
            jobs,
            cache_root,
            compiler: options.compiler,
            resolved_dependencies: Vec::new(),
            packages: Vec::new(),
            fs,
            executor,
            http,
        })
    }

    /// The target actually built for: the explicit one, or the host.
    ///
    /// # Errors
    /// Returns an error if no target was given and the host is unsupported.
    pub fn effective_target(&self) -> Result<Target, EngineError> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => Ok(host_target()?),
        }
    }
}
