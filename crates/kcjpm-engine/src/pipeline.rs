//! The staged build pipeline: stages as data, driven in declared order with
//! event reporting, cancellation, and a per-project build lock.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kcjpm_config::lockfile::{LockError, LockFile};
use kcjpm_config::manifest::DependencySpec;
use kcjpm_util::lock::AdvisoryLock;

use crate::context::CompilationContext;
use crate::error::EngineError;
use crate::events::{ChangeKind, CompilationEvent, EventBus};
use crate::fetch::{FetchContext, FetchMode};
use crate::incremental::{self, FingerprintFile};
use crate::resolve::{generate_lock_file, install_dependencies};

/// Advisory lock excluding concurrent builds of one project.
pub const BUILD_LOCK_FILE: &str = ".kcjpm.buildlock";

/// An external cancellation signal, checked between stages and between
/// package-compile dispatches.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub(crate) fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}

/// Mutable state threaded through the stages of one run.
pub struct BuildState {
    pub ctx: CompilationContext,
    pub bus: Arc<EventBus>,
    pub cancel: CancellationToken,
    /// Fingerprints loaded from the previous build.
    pub fingerprints: FingerprintFile,
    /// Fingerprints computed for this build, persisted on success.
    pub next_fingerprints: FingerprintFile,
    /// Change classification per discovered package.
    pub changes: BTreeMap<String, ChangeKind>,
    /// Artifact paths per compiled unit.
    pub artifacts: BTreeMap<String, PathBuf>,
}

/// One named pipeline stage.
pub struct Stage {
    pub name: &'static str,
    pub run: fn(&mut BuildState) -> Result<(), EngineError>,
}

/// What a successful run produced.
#[derive(Debug)]
pub struct PipelineReport {
    pub artifacts: BTreeMap<String, PathBuf>,
    pub output_path: PathBuf,
    pub duration: Duration,
}

/// The staged executor. Stages are plain data: add or remove them by list
/// manipulation before calling [`Pipeline::run`].
pub struct Pipeline {
    stages: Vec<Stage>,
    bus: EventBus,
    cancel: CancellationToken,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    /// The standard seven-stage build pipeline.
    pub fn standard() -> Self {
        Self::with_stages(vec![
            Stage {
                name: "validate",
                run: stage_validate,
            },
            Stage {
                name: "resolve-dependencies",
                run: stage_resolve,
            },
            Stage {
                name: "discover-packages",
                run: stage_discover,
            },
            Stage {
                name: "load-incremental-cache",
                run: stage_cache_load,
            },
            Stage {
                name: "detect-changes",
                run: stage_change_detection,
            },
            Stage {
                name: "compile",
                run: crate::compile::stage_compile,
            },
            Stage {
                name: "store-incremental-cache",
                run: stage_cache_store,
            },
        ])
    }

    pub fn with_stages(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            bus: EventBus::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Register an event listener. Consuming `self` in [`Pipeline::run`]
    /// closes registration at pipeline start.
    pub fn subscribe(
        &mut self,
        listener: impl Fn(&CompilationEvent) + Send + Sync + 'static,
    ) {
        self.bus.subscribe(listener);
    }

    /// A token that cancels this pipeline from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drive all stages in order against `ctx`.
    ///
    /// A project-level build lock is held for the duration of the run. On the
    /// first stage failure, remaining stages are skipped and
    /// `PipelineCompleted { success: false }` is emitted before the error
    /// returns.
    ///
    /// # Errors
    /// Returns the failing stage's error, or `Cancelled`.
    pub fn run(self, ctx: CompilationContext) -> Result<PipelineReport, EngineError> {
        let start = Instant::now();
        let _build_lock = AdvisoryLock::acquire(&ctx.project_root.join(BUILD_LOCK_FILE))?;

        let bus = Arc::new(self.bus);
        let total_stages = self.stages.len();
        let mut state = BuildState {
            ctx,
            bus: Arc::clone(&bus),
            cancel: self.cancel,
            fingerprints: FingerprintFile::default(),
            next_fingerprints: FingerprintFile::default(),
            changes: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        };

        bus.emit(&CompilationEvent::PipelineStarted { total_stages });

        for (stage_index, stage) in self.stages.iter().enumerate() {
            if state.cancel.is_cancelled() {
                bus.emit(&CompilationEvent::PipelineCompleted { success: false });
                return Err(EngineError::Cancelled);
            }

            bus.emit(&CompilationEvent::StageStarted {
                stage_index,
                stage_name: stage.name.to_owned(),
                total_stages,
            });

            if let Err(error) = (stage.run)(&mut state) {
                bus.emit(&CompilationEvent::StageCompleted {
                    stage_index,
                    stage_name: stage.name.to_owned(),
                    total_stages,
                    success: false,
                });
                bus.emit(&CompilationEvent::PipelineCompleted { success: false });
                return Err(error);
            }

            bus.emit(&CompilationEvent::StageCompleted {
                stage_index,
                stage_name: stage.name.to_owned(),
                total_stages,
                success: true,
            });
        }

        bus.emit(&CompilationEvent::PipelineCompleted { success: true });
        Ok(PipelineReport {
            artifacts: state.artifacts,
            output_path: state.ctx.output_path.clone(),
            duration: start.elapsed(),
        })
    }
}

fn stage_validate(state: &mut BuildState) -> Result<(), EngineError> {
    let ctx = &state.ctx;
    let check = |description: String, passed: bool| {
        state.bus.emit(&CompilationEvent::ValidationCheck {
            description,
            passed,
        });
    };

    let root_ok = ctx.fs.is_dir(&ctx.project_root);
    check(
        format!("project root {}", ctx.project_root.display()),
        root_ok,
    );
    if !root_ok {
        return Err(EngineError::Io {
            path: ctx.project_root.display().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "project root does not exist",
            ),
        });
    }

    // The manifest was parsed during context assembly.
    check(format!("manifest for `{}`", ctx.manifest.package.name), true);

    let src_ok = ctx.fs.is_dir(&ctx.source_dir);
    check(format!("source directory {}", ctx.source_dir.display()), src_ok);
    if !src_ok {
        return Err(EngineError::SourceDirMissing {
            dir: ctx.source_dir.display().to_string(),
        });
    }

    for (name, spec) in &ctx.manifest.dependencies {
        if let DependencySpec::Path { path, optional, .. } = spec {
            if *optional {
                continue;
            }
            let resolved = kcjpm_util::fs::normalize(&ctx.project_root.join(path));
            let present = ctx.fs.is_dir(&resolved);
            check(format!("path dependency `{name}`"), present);
            if !present {
                return Err(EngineError::PathNotFound {
                    name: name.clone(),
                    path: resolved.display().to_string(),
                });
            }
        }
    }

    Ok(())
}

fn stage_resolve(state: &mut BuildState) -> Result<(), EngineError> {
    let existing_lock = match LockFile::read(&state.ctx.project_root) {
        Ok(lock) => Some(lock),
        Err(LockError::Missing { .. }) => None,
        Err(error) => {
            tracing::warn!(%error, "ignoring unreadable lock file");
            None
        }
    };
    // Only a lock file consistent with the manifest may pin resolution.
    let pinning_lock = existing_lock
        .as_ref()
        .filter(|lock| lock.validate(&state.ctx.manifest).is_valid());

    let resolved = {
        let fetch_ctx = FetchContext {
            project_root: &state.ctx.project_root,
            cache_root: &state.ctx.cache_root,
            fs: &*state.ctx.fs,
            executor: &*state.ctx.executor,
            http: &*state.ctx.http,
            mode: FetchMode::Install,
        };
        install_dependencies(&state.ctx.manifest, pinning_lock, &fetch_ctx)?
    };

    for dep in &resolved {
        state.bus.emit(&CompilationEvent::DependencyResolved {
            name: dep.name.clone(),
            version: dep.version.clone(),
            location: dep.location.clone(),
        });
    }

    let fresh = generate_lock_file(
        &state.ctx.project_root,
        &resolved,
        env!("CARGO_PKG_VERSION"),
    );
    let up_to_date = existing_lock
        .as_ref()
        .is_some_and(|lock| lock.packages == fresh.packages);
    if !up_to_date && !(existing_lock.is_none() && fresh.packages.is_empty()) {
        fresh.write(&state.ctx.project_root)?;
    }

    state.ctx.resolved_dependencies = resolved;
    Ok(())
}

fn stage_discover(state: &mut BuildState) -> Result<(), EngineError> {
    let packages = crate::discover::discover_packages(
        &*state.ctx.fs,
        &state.ctx.source_dir,
        &state.ctx.manifest.package.name,
    )?;

    state.bus.emit(&CompilationEvent::PackagesDiscovered {
        package_count: packages.len(),
    });
    for package in &packages {
        state.bus.emit(&CompilationEvent::PackageDiscovered {
            name: package.name.clone(),
            source_file_count: package.source_file_count(),
        });
    }

    state.ctx.packages = packages;
    Ok(())
}

fn stage_cache_load(state: &mut BuildState) -> Result<(), EngineError> {
    if state.ctx.build.incremental {
        state.fingerprints = incremental::load(&state.ctx.output_path);
    }
    state.bus.emit(&CompilationEvent::IncrementalCacheLoaded {
        entry_count: state.fingerprints.packages.len(),
    });
    Ok(())
}

fn stage_change_detection(state: &mut BuildState) -> Result<(), EngineError> {
    // External dependencies feed every package's full hash: a rebuilt
    // dependency recompiles the project as DependencyChanged.
    let deps_digest = {
        let mut fingerprint = kcjpm_util::hash::Fingerprint::new();
        for dep in &state.ctx.resolved_dependencies {
            fingerprint.component(&dep.name, dep.source_hash.as_bytes());
        }
        fingerprint.finish()
    };

    let packages = state.ctx.packages.clone();
    let mut full_hashes: BTreeMap<String, String> = BTreeMap::new();

    // Packages arrive in topological order, so every import's full hash is
    // computed before its importers need it.
    for package in &packages {
        let source_hash = incremental::package_source_hash(package)?;

        let mut dep_hashes: Vec<&str> = package
            .imports
            .iter()
            .filter_map(|import| full_hashes.get(import).map(String::as_str))
            .collect();
        dep_hashes.push(&deps_digest);
        let full_hash = incremental::combine(&source_hash, &dep_hashes);

        let current = incremental::PackageFingerprint {
            source_hash,
            full_hash: full_hash.clone(),
        };
        let change =
            incremental::detect_change(state.fingerprints.packages.get(&package.name), &current);

        state.bus.emit(&CompilationEvent::ChangeDetected {
            package: package.name.clone(),
            change,
        });

        full_hashes.insert(package.name.clone(), full_hash);
        state.changes.insert(package.name.clone(), change);
        state
            .next_fingerprints
            .packages
            .insert(package.name.clone(), current);
    }

    Ok(())
}

fn stage_cache_store(state: &mut BuildState) -> Result<(), EngineError> {
    let entry_count = state.next_fingerprints.packages.len();
    if state.ctx.build.incremental {
        incremental::store(&state.ctx.output_path, &state.next_fingerprints)?;
    }
    state
        .bus
        .emit(&CompilationEvent::IncrementalCacheStored { entry_count });
    Ok(())
}
