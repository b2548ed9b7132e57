//! Error types for kcjpm-cjc.

/// Errors produced by compiler invocations.
#[derive(Debug, thiserror::Error)]
pub enum CjcError {
    /// The command builder was given no source files.
    #[error("no source files to compile")]
    NoSources,

    /// The command builder was given no output directory.
    #[error("no output directory set")]
    NoOutput,

    /// The compiler process could not be spawned or awaited.
    #[error("cannot run compiler: {0}")]
    Spawn(#[from] kcjpm_util::error::UtilError),

    /// The compilation was cancelled before the compiler exited.
    #[error("compilation cancelled")]
    Cancelled,
}
