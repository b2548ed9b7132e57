//! The compile stage: external dependencies first, then project packages in
//! topological levels with bounded parallelism.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use kcjpm_cjc::error::CjcError;
use kcjpm_cjc::invoke::{CjcCommand, OutputKind};
use kcjpm_config::manifest::OutputType;
use kcjpm_targets::Target;

use crate::context::CompilationContext;
use crate::discover::PackageInfo;
use crate::error::EngineError;
use crate::events::{ChangeKind, CompilationEvent, EventBus};
use crate::graph;
use crate::incremental::{FingerprintFile, PackageFingerprint};
use crate::pipeline::{BuildState, CancellationToken};
use crate::resolve::ResolvedDependency;

/// File extension of compiled intermediate artifacts.
const ARTIFACT_EXTENSION: &str = "cjo";

pub(crate) fn stage_compile(state: &mut BuildState) -> Result<(), EngineError> {
    let target = state.ctx.effective_target()?;
    state.ctx.fs.create_dirs(&state.ctx.output_path)?;

    let dep_artifacts = compile_dependencies(state)?;
    compile_packages(state, &dep_artifacts, &target)
}

fn dep_artifact_path(ctx: &CompilationContext, name: &str) -> PathBuf {
    ctx.output_path
        .join("deps")
        .join(format!("{name}.{ARTIFACT_EXTENSION}"))
}

fn package_artifact_path(ctx: &CompilationContext, target: &Target, package: &str) -> PathBuf {
    let is_root = package == ctx.manifest.package.name;
    if is_root && ctx.output_type == OutputType::Executable {
        ctx.output_path
            .join(format!("{package}{}", target.executable_suffix()))
    } else {
        ctx.output_path
            .join(format!("{package}.{ARTIFACT_EXTENSION}"))
    }
}

fn output_kind(output_type: OutputType) -> OutputKind {
    match output_type {
        OutputType::Executable => OutputKind::Executable,
        OutputType::Library => OutputKind::Library,
        OutputType::StaticLibrary => OutputKind::StaticLibrary,
        OutputType::DynamicLibrary => OutputKind::DynamicLibrary,
    }
}

/// Build every resolved dependency as a library, leaves first, and return
/// the artifact path per dependency name.
fn compile_dependencies(
    state: &mut BuildState,
) -> Result<BTreeMap<String, PathBuf>, EngineError> {
    let ctx = state.ctx.clone();
    let bus = Arc::clone(&state.bus);
    let cancel = state.cancel.clone();
    let fingerprints = state.fingerprints.clone();

    let by_name: BTreeMap<&str, &ResolvedDependency> = ctx
        .resolved_dependencies
        .iter()
        .map(|dep| (dep.name.as_str(), dep))
        .collect();
    let order: Vec<String> = ctx
        .resolved_dependencies
        .iter()
        .map(|dep| dep.name.clone())
        .collect();
    let edges: BTreeMap<String, Vec<String>> = ctx
        .resolved_dependencies
        .iter()
        .map(|dep| (dep.name.clone(), dep.dep_names.clone()))
        .collect();

    let mut artifacts: BTreeMap<String, PathBuf> = BTreeMap::new();

    for level in graph::levels(&order, &edges) {
        let results = run_level(&ctx, &level, |name| {
            let Some(&dep) = by_name.get(name.as_str()) else {
                return Err(EngineError::DependencyNotFound {
                    name: name.clone(),
                    location: "<resolution output>".to_owned(),
                });
            };
            compile_one_dependency(&ctx, &bus, &cancel, dep, &artifacts, &fingerprints)
                .map(|artifact| (name.clone(), artifact))
        });

        for result in results {
            let (name, artifact) = result?;
            artifacts.insert(name, artifact);
        }
    }

    // Record dependency fingerprints so unchanged dependencies skip
    // recompilation next build.
    for dep in &state.ctx.resolved_dependencies {
        state.next_fingerprints.packages.insert(
            format!("dep::{}", dep.name),
            PackageFingerprint {
                source_hash: dep.source_hash.clone(),
                full_hash: dep.source_hash.clone(),
            },
        );
    }
    for (name, artifact) in &artifacts {
        state.artifacts.insert(name.clone(), artifact.clone());
    }

    Ok(artifacts)
}

fn compile_one_dependency(
    ctx: &CompilationContext,
    bus: &Arc<EventBus>,
    cancel: &CancellationToken,
    dep: &ResolvedDependency,
    prior_artifacts: &BTreeMap<String, PathBuf>,
    fingerprints: &FingerprintFile,
) -> Result<PathBuf, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let artifact = dep_artifact_path(ctx, &dep.name);

    let unchanged = fingerprints
        .packages
        .get(&format!("dep::{}", dep.name))
        .is_some_and(|fp| fp.source_hash == dep.source_hash)
        && ctx.fs.is_file(&artifact);
    if unchanged {
        emit_skipped(bus, &dep.name, &artifact);
        return Ok(artifact);
    }

    // A dependency compiles as one library unit; discovery validates its
    // tree (including its internal import graph) and yields the sources in
    // a stable order.
    let src_dir = dep.location.join(&dep.manifest.build.source_dir);
    let sources: Vec<PathBuf> = crate::discover::discover_packages(&*ctx.fs, &src_dir, &dep.name)?
        .into_iter()
        .flat_map(|package| package.source_files)
        .collect();
    if sources.is_empty() {
        return Err(EngineError::SourceDirMissing {
            dir: src_dir.display().to_string(),
        });
    }

    let imports: Vec<PathBuf> = dep
        .dep_names
        .iter()
        .filter_map(|name| prior_artifacts.get(name).cloned())
        .collect();

    compile_unit(
        ctx,
        bus,
        cancel,
        &dep.name,
        &sources,
        OutputKind::Library,
        &artifact,
        &imports,
    )?;
    Ok(artifact)
}

/// Compile the discovered packages in topological levels. Each package
/// imports every dependency artifact and every package compiled in an
/// earlier level.
fn compile_packages(
    state: &mut BuildState,
    dep_artifacts: &BTreeMap<String, PathBuf>,
    target: &Target,
) -> Result<(), EngineError> {
    let ctx = state.ctx.clone();
    let bus = Arc::clone(&state.bus);
    let cancel = state.cancel.clone();
    let changes = state.changes.clone();

    let by_name: BTreeMap<&str, &PackageInfo> = ctx
        .packages
        .iter()
        .map(|package| (package.name.as_str(), package))
        .collect();
    let order: Vec<String> = ctx.packages.iter().map(|p| p.name.clone()).collect();
    let edges: BTreeMap<String, Vec<String>> = ctx
        .packages
        .iter()
        .map(|p| (p.name.clone(), p.imports.clone()))
        .collect();

    // Imports accumulate level by level: dependency artifacts first, then
    // every already-compiled package.
    let mut importable: Vec<PathBuf> = ctx
        .resolved_dependencies
        .iter()
        .filter_map(|dep| dep_artifacts.get(&dep.name).cloned())
        .collect();

    for level in graph::levels(&order, &edges) {
        let imports = importable.clone();
        let results = run_level(&ctx, &level, |name| {
            let Some(&package) = by_name.get(name.as_str()) else {
                return Err(EngineError::DependencyNotFound {
                    name: name.clone(),
                    location: "<discovery output>".to_owned(),
                });
            };
            compile_one_package(&ctx, &bus, &cancel, package, &imports, &changes, target)
                .map(|artifact| (name.clone(), artifact))
        });

        for result in results {
            let (name, artifact) = result?;
            importable.push(artifact.clone());
            state.artifacts.insert(name, artifact);
        }
    }

    Ok(())
}

fn compile_one_package(
    ctx: &CompilationContext,
    bus: &Arc<EventBus>,
    cancel: &CancellationToken,
    package: &PackageInfo,
    imports: &[PathBuf],
    changes: &BTreeMap<String, ChangeKind>,
    target: &Target,
) -> Result<PathBuf, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let artifact = package_artifact_path(ctx, target, &package.name);

    let change = changes
        .get(&package.name)
        .copied()
        .unwrap_or(ChangeKind::New);
    if ctx.build.incremental && change == ChangeKind::Unchanged && ctx.fs.is_file(&artifact) {
        emit_skipped(bus, &package.name, &artifact);
        return Ok(artifact);
    }

    let kind = if package.name == ctx.manifest.package.name {
        output_kind(ctx.output_type)
    } else {
        OutputKind::Library
    };

    compile_unit(
        ctx,
        bus,
        cancel,
        &package.name,
        &package.source_files,
        kind,
        &artifact,
        imports,
    )?;
    Ok(artifact)
}

/// Events for a unit reused from cache: Started then Completed, no command.
fn emit_skipped(bus: &Arc<EventBus>, name: &str, artifact: &Path) {
    bus.emit(&CompilationEvent::PackageCompilationStarted {
        package: name.to_owned(),
    });
    bus.emit(&CompilationEvent::PackageCompilationCompleted {
        package: name.to_owned(),
        success: true,
        output_path: Some(artifact.to_path_buf()),
        error_count: 0,
        warning_count: 0,
    });
}

/// Run one compiler invocation with full event reporting.
#[allow(clippy::too_many_arguments)]
fn compile_unit(
    ctx: &CompilationContext,
    bus: &Arc<EventBus>,
    cancel: &CancellationToken,
    name: &str,
    sources: &[PathBuf],
    kind: OutputKind,
    artifact: &Path,
    imports: &[PathBuf],
) -> Result<(), EngineError> {
    let output_dir = artifact.parent().unwrap_or(&ctx.output_path);
    ctx.fs.create_dirs(output_dir)?;

    let command = CjcCommand::new()
        .sources(sources)
        .output_dir(output_dir)
        .output_type(kind)
        .optimization_level(ctx.profile.optimization_level)
        .debug_info(ctx.profile.debug_info)
        .lto(ctx.profile.lto)
        .target(ctx.target.as_ref().map(Target::to_cjc_arg))
        .imports(imports);

    bus.emit(&CompilationEvent::PackageCompilationStarted {
        package: name.to_owned(),
    });
    bus.emit(&CompilationEvent::PackageCompilationCommand {
        package: name.to_owned(),
        command: command.full_argv(&ctx.compiler)?,
    });

    let stdout_bus = Arc::clone(bus);
    let stdout_package = name.to_owned();
    let stderr_bus = Arc::clone(bus);
    let stderr_package = name.to_owned();

    let result = command.execute_streaming(
        &ctx.compiler,
        &*ctx.executor,
        Box::new(move |line| {
            stdout_bus.emit(&CompilationEvent::CompilerOutput {
                package: stdout_package.clone(),
                line,
                stderr: false,
            });
        }),
        Box::new(move |line| {
            stderr_bus.emit(&CompilationEvent::CompilerOutput {
                package: stderr_package.clone(),
                line,
                stderr: true,
            });
        }),
        Some(cancel.flag()),
    );

    match result {
        Ok(outcome) if outcome.success => {
            bus.emit(&CompilationEvent::PackageCompilationCompleted {
                package: name.to_owned(),
                success: true,
                output_path: Some(artifact.to_path_buf()),
                error_count: outcome.error_count(),
                warning_count: outcome.warning_count(),
            });
            Ok(())
        }
        Ok(outcome) => {
            let error_count = outcome.error_count();
            bus.emit(&CompilationEvent::PackageCompilationCompleted {
                package: name.to_owned(),
                success: false,
                output_path: None,
                error_count,
                warning_count: outcome.warning_count(),
            });
            Err(EngineError::CompilationFailed {
                package: name.to_owned(),
                error_count,
            })
        }
        Err(error) => {
            bus.emit(&CompilationEvent::PackageCompilationCompleted {
                package: name.to_owned(),
                success: false,
                output_path: None,
                error_count: 0,
                warning_count: 0,
            });
            match error {
                CjcError::Cancelled => Err(EngineError::Cancelled),
                other => Err(EngineError::Compiler(other)),
            }
        }
    }
}

/// Map `f` over one topological level, in parallel when parallel builds are
/// enabled (pool sized to the configured job count), serially otherwise.
fn run_level<T: Send>(
    ctx: &CompilationContext,
    level: &[String],
    f: impl Fn(&String) -> Result<T, EngineError> + Send + Sync,
) -> Vec<Result<T, EngineError>> {
    let threads = ctx.jobs.min(level.len()).max(1);
    if ctx.build.parallel && threads > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| level.par_iter().map(&f).collect()),
            Err(error) => {
                tracing::warn!(%error, "thread pool unavailable; compiling serially");
                level.iter().map(&f).collect()
            }
        }
    } else {
        level.iter().map(&f).collect()
    }
}
