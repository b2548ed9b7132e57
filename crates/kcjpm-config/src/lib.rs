#![forbid(unsafe_code)]
//! Manifest and lock-file model for kcjpm.
//!
//! Two manifest dialects (`kcjpm.toml` and the compatibility `cjpm.toml`)
//! parse into one canonical [`manifest::Manifest`]. The lock file pins every
//! resolved dependency to an exact [`source::PackageSource`].

pub mod dialect;
pub mod foreign;
pub mod lockfile;
pub mod manifest;
pub mod source;

pub use dialect::{detect_dialect, load_from_project_root, Dialect};
pub use lockfile::{LockError, LockFile, LockValidation, LockedPackage};
pub use manifest::{
    BuildConfig, DependencySpec, Manifest, ManifestError, OutputType, Package, Profile,
    RegistryConfig, WorkspaceConfig,
};
pub use source::{GitReference, PackageSource, SourceParseError};
