//! Error types for kcjpm-engine.

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A filesystem operation failed.
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// A utility operation failed.
    #[error("{0}")]
    Util(#[from] kcjpm_util::error::UtilError),

    /// A manifest operation failed.
    #[error("{0}")]
    Manifest(#[from] kcjpm_config::manifest::ManifestError),

    /// A lock-file operation failed.
    #[error("{0}")]
    Lock(#[from] kcjpm_config::lockfile::LockError),

    /// Target resolution failed.
    #[error("{0}")]
    Target(#[from] kcjpm_targets::TargetError),

    /// The compiler could not be invoked.
    #[error("{0}")]
    Compiler(#[from] kcjpm_cjc::error::CjcError),

    /// A dependency could not be located.
    #[error("dependency `{name}` not found at {location}")]
    DependencyNotFound { name: String, location: String },

    /// The same package was requested at two different versions.
    #[error("version conflict for `{name}`: {first_seen_by} requires {first_version}, {conflicting_declarant} requires {second_version}")]
    VersionConflict {
        name: String,
        first_version: String,
        second_version: String,
        first_seen_by: String,
        conflicting_declarant: String,
    },

    /// The dependency graph contains a cycle.
    #[error("dependency cycle detected: {path}")]
    DependencyCycle { path: String },

    /// A path dependency does not exist on disk.
    #[error("path dependency `{name}` not found at {path}")]
    PathNotFound { name: String, path: String },

    /// A git repository could not be reached or cloned.
    #[error("cannot reach git repository {url}: {message}")]
    GitUnreachable { url: String, message: String },

    /// A registry endpoint could not be reached.
    #[error("cannot reach registry {url}: {message}")]
    RegistryUnreachable { url: String, message: String },

    /// A dependency names the private registry but none is configured.
    #[error("dependency `{name}` uses the private registry, but [registry].private is not set in the manifest")]
    RegistryNotConfigured { name: String },

    /// A downloaded archive does not match its advertised checksum.
    #[error("checksum mismatch for `{name}` — expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// The configured source directory does not exist.
    #[error("source directory {dir} does not exist")]
    SourceDirMissing { dir: String },

    /// Packages within the project import each other cyclically.
    #[error("cyclic imports between project packages: {path}")]
    IntraProjectCycle { path: String },

    /// The requested profile is not declared.
    #[error("unknown profile `{name}`, available profiles: {available}")]
    UnknownProfile { name: String, available: String },

    /// The compiler reported errors.
    #[error("compilation of `{package}` failed with {error_count} error(s)")]
    CompilationFailed { package: String, error_count: usize },

    /// The build was cancelled.
    #[error("build cancelled")]
    Cancelled,
}
