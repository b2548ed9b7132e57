//! Transitive dependency resolution: worklist traversal, conflict and cycle
//! detection, topological ordering, and lock-file generation.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Component, Path, PathBuf};

use kcjpm_config::lockfile::{LockFile, LockedPackage};
use kcjpm_config::manifest::{DependencySpec, Manifest, RegistryConfig};
use kcjpm_config::source::{GitReference, PackageSource};

use crate::error::EngineError;
use crate::fetch::{fetch_dependency, FetchContext};
use crate::graph;

/// Registry used when a manifest names `default` but declares no
/// `[registry]` section.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.cangjie-lang.cn";

/// One fully resolved dependency.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    /// The dependency name (the `[dependencies]` key).
    pub name: String,
    /// Version recorded in the lock file: the declared version, or the
    /// fetched manifest's own version when none was declared.
    pub version: String,
    /// The version string the declarant asked for, if any.
    pub declared_version: Option<String>,
    /// The spec as declared in the manifest.
    pub spec: DependencySpec,
    /// Parsed manifest of the fetched dependency.
    pub manifest: Manifest,
    /// Directory containing the dependency's project tree.
    pub location: PathBuf,
    /// SHA-256 of the dependency's source tree.
    pub source_hash: String,
    /// For git dependencies: the commit the checkout resolved to.
    pub resolved_commit: Option<String>,
    /// For registry dependencies: the verified archive checksum (hex).
    pub checksum: Option<String>,
    /// For registry dependencies: the resolved registry URL.
    pub registry_url: Option<String>,
    /// Names of this dependency's direct non-optional dependencies.
    pub dep_names: Vec<String>,
}

struct WorkItem {
    name: String,
    spec: DependencySpec,
    declared_by: String,
    parent_root: PathBuf,
    registry_cfg: Option<RegistryConfig>,
}

/// Resolve the full transitive dependency graph of `manifest` and return it
/// in reverse topological order (leaves first) — the install-and-compile
/// order.
///
/// An iterative worklist walks the graph: each dependency is fetched, its
/// manifest loaded, and its own non-optional dependencies enqueued. Entries
/// are deduplicated by name; two different declared version strings for one
/// name are a conflict. A valid lock file pins git dependencies to their
/// recorded commits.
///
/// # Errors
/// Returns `VersionConflict`, `DependencyCycle`, fetch errors, or manifest
/// errors from the dependency trees.
pub fn install_dependencies(
    manifest: &Manifest,
    lock: Option<&LockFile>,
    ctx: &FetchContext<'_>,
) -> Result<Vec<ResolvedDependency>, EngineError> {
    let mut queue: VecDeque<WorkItem> = seed_items(manifest, ctx.project_root);
    // name -> (declared version, declarant) for conflict detection.
    let mut visited: BTreeMap<String, (Option<String>, String)> = BTreeMap::new();
    let mut resolved: BTreeMap<String, ResolvedDependency> = BTreeMap::new();
    let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();

    while let Some(item) = queue.pop_front() {
        let declared_version = item.spec.declared_version().map(str::to_owned);

        if let Some((first_version, first_seen_by)) = visited.get(&item.name) {
            // Same name seen again: equal (or absent) version strings
            // deduplicate, distinct ones conflict.
            if let (Some(first), Some(second)) = (first_version, &declared_version) {
                if first != second {
                    return Err(EngineError::VersionConflict {
                        name: item.name,
                        first_version: first.clone(),
                        second_version: second.clone(),
                        first_seen_by: first_seen_by.clone(),
                        conflicting_declarant: item.declared_by,
                    });
                }
            }
            continue;
        }
        visited.insert(
            item.name.clone(),
            (declared_version.clone(), item.declared_by.clone()),
        );

        let effective = effective_spec(&item, lock)?;
        let fetched = fetch_dependency(&item.name, &effective, &item.parent_root, ctx)?;

        let dep_manifest =
            kcjpm_config::dialect::load_from_project_root(&fetched.location).map_err(|e| {
                match e {
                    kcjpm_config::manifest::ManifestError::MissingManifest { .. } => {
                        EngineError::DependencyNotFound {
                            name: item.name.clone(),
                            location: fetched.location.display().to_string(),
                        }
                    }
                    other => EngineError::Manifest(other),
                }
            })?;

        let mut dep_names = Vec::new();
        for (child_name, child_spec) in &dep_manifest.dependencies {
            if child_spec.optional() {
                continue;
            }
            dep_names.push(child_name.clone());
            queue.push_back(WorkItem {
                name: child_name.clone(),
                spec: child_spec.clone(),
                declared_by: item.name.clone(),
                parent_root: fetched.location.clone(),
                registry_cfg: dep_manifest.registry.clone(),
            });
        }
        edges.insert(item.name.clone(), dep_names.clone());

        let src_dir = fetched.location.join(&dep_manifest.build.source_dir);
        let source_hash = kcjpm_util::hash::source_tree_hash(&src_dir).unwrap_or_default();

        let registry_url = fetched.registry_url.clone().or_else(|| match &effective {
            DependencySpec::Registry { registry, .. } => Some(registry.clone()),
            _ => None,
        });

        resolved.insert(
            item.name.clone(),
            ResolvedDependency {
                version: declared_version
                    .clone()
                    .unwrap_or_else(|| dep_manifest.package.version.clone()),
                declared_version,
                name: item.name,
                spec: item.spec,
                manifest: dep_manifest,
                location: fetched.location,
                source_hash,
                resolved_commit: fetched.resolved_commit,
                checksum: fetched.checksum,
                registry_url,
                dep_names,
            },
        );
    }

    let nodes: Vec<String> = resolved.keys().cloned().collect();
    let order = graph::topo_sort(&nodes, &edges)
        .map_err(|cycle| EngineError::DependencyCycle { path: cycle.path })?;

    Ok(order
        .into_iter()
        .filter_map(|name| resolved.remove(&name))
        .collect())
}

/// Preflight the direct dependencies of `manifest` without installing
/// anything: path existence, git reachability, registry metadata.
///
/// Used by `add`-style operations before a spec is committed to the manifest.
///
/// # Errors
/// Returns the first accessibility error encountered.
pub fn check_dependencies(
    manifest: &Manifest,
    ctx: &FetchContext<'_>,
) -> Result<(), EngineError> {
    for item in seed_items(manifest, ctx.project_root) {
        let effective = effective_spec(&item, None)?;
        fetch_dependency(&item.name, &effective, &item.parent_root, ctx)?;
    }
    Ok(())
}

fn seed_items(manifest: &Manifest, project_root: &Path) -> VecDeque<WorkItem> {
    manifest
        .dependencies
        .iter()
        .filter(|(_, spec)| !spec.optional())
        .map(|(name, spec)| WorkItem {
            name: name.clone(),
            spec: spec.clone(),
            declared_by: manifest.package.name.clone(),
            parent_root: project_root.to_path_buf(),
            registry_cfg: manifest.registry.clone(),
        })
        .collect()
}

/// Rewrite a spec for fetching: named registries become literal URLs, and a
/// matching lock entry pins a git ref to its recorded commit.
fn effective_spec(item: &WorkItem, lock: Option<&LockFile>) -> Result<DependencySpec, EngineError> {
    match &item.spec {
        DependencySpec::Registry {
            version,
            registry,
            optional,
        } => {
            let url = resolve_registry_url(registry, item.registry_cfg.as_ref(), &item.name)?;
            Ok(DependencySpec::Registry {
                version: version.clone(),
                registry: url,
                optional: *optional,
            })
        }
        DependencySpec::Git {
            version,
            url,
            reference,
            optional,
        } => {
            if let Some(commit) = locked_commit(lock, &item.name, url, reference) {
                return Ok(DependencySpec::Git {
                    version: version.clone(),
                    url: url.clone(),
                    reference: GitReference::Commit(commit),
                    optional: *optional,
                });
            }
            Ok(item.spec.clone())
        }
        DependencySpec::Path { .. } => Ok(item.spec.clone()),
    }
}

/// The commit a lock file pins `name` to, when its entry matches the
/// declared url and ref.
fn locked_commit(
    lock: Option<&LockFile>,
    name: &str,
    url: &str,
    reference: &GitReference,
) -> Option<String> {
    let entry = lock?.packages.iter().find(|p| p.name == name)?;
    match &entry.source {
        PackageSource::Git {
            url: locked_url,
            reference: locked_ref,
            resolved_commit: Some(commit),
        } if locked_url == url && locked_ref == reference => Some(commit.clone()),
        _ => None,
    }
}

/// Map a named registry (`default`, `private`, or a literal URL) to a URL
/// using the declaring manifest's `[registry]` section.
fn resolve_registry_url(
    registry: &str,
    cfg: Option<&RegistryConfig>,
    dep_name: &str,
) -> Result<String, EngineError> {
    match registry {
        "default" => Ok(cfg
            .and_then(|c| c.default.clone())
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_owned())),
        "private" => cfg
            .and_then(|c| c.private.clone())
            .ok_or_else(|| EngineError::RegistryNotConfigured {
                name: dep_name.to_owned(),
            }),
        url => Ok(url.to_owned()),
    }
}

/// Generate a lock file pinning `resolved` (in resolution order).
pub fn generate_lock_file(
    project_root: &Path,
    resolved: &[ResolvedDependency],
    tool_version: &str,
) -> LockFile {
    let mut lock = LockFile::new(tool_version);
    for dep in resolved {
        let source = match &dep.spec {
            DependencySpec::Path { .. } => PackageSource::Path {
                path: kcjpm_util::fs::to_forward_slashes(&relative_path(
                    project_root,
                    &dep.location,
                )),
            },
            DependencySpec::Git { url, reference, .. } => PackageSource::Git {
                url: url.clone(),
                reference: reference.clone(),
                resolved_commit: dep.resolved_commit.clone(),
            },
            DependencySpec::Registry { registry, .. } => PackageSource::Registry {
                url: dep
                    .registry_url
                    .clone()
                    .unwrap_or_else(|| registry.clone()),
            },
        };
        lock.packages.push(LockedPackage {
            name: dep.name.clone(),
            version: dep.version.clone(),
            source,
            checksum: dep.checksum.as_ref().map(|c| format!("sha256:{c}")),
            dependencies: dep.dep_names.clone(),
        });
    }
    lock
}

/// Express `target` relative to `base` using `..` components where needed.
fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base_parts: Vec<Component<'_>> = base.components().collect();
    let target_parts: Vec<Component<'_>> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in base_parts.iter().skip(common) {
        out.push("..");
    }
    for part in target_parts.iter().skip(common) {
        out.push(part.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
