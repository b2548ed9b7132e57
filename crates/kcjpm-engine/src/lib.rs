#![forbid(unsafe_code)]
//! Dependency acquisition, resolution, package discovery, and the staged
//! compilation pipeline for kcjpm.

pub mod cache;
mod compile;
pub mod context;
pub mod discover;
pub mod error;
pub mod events;
pub mod fetch;
pub mod git;
mod graph;
pub mod incremental;
pub mod pipeline;
pub mod registry;
pub mod resolve;

pub use context::{CompilationContext, ContextOptions};
pub use discover::{discover_packages, PackageInfo};
pub use error::EngineError;
pub use events::{ChangeKind, CompilationEvent, EventBus};
pub use fetch::{FetchContext, FetchMode, Fetched};
pub use pipeline::{BuildState, CancellationToken, Pipeline, PipelineReport, Stage};
pub use registry::{HttpClient, HttpResponse, UreqClient};
pub use resolve::{
    check_dependencies, generate_lock_file, install_dependencies, ResolvedDependency,
};
