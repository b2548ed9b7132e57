//! Package discovery: walk the source tree, group `.cj` files into packages,
//! and infer intra-project dependencies from `import` lines.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use kcjpm_util::fs::FileSystem;

use crate::error::EngineError;
use crate::graph;

/// Extension of source files in this language.
pub const SOURCE_EXTENSION: &str = "cj";

/// One discovered package: a directory with at least one source file.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    /// The root directory's package carries the project name; nested
    /// directories are named by their relative path, dot-joined
    /// (`foo/bar` → `foo.bar`).
    pub name: String,
    pub path: PathBuf,
    /// Source files directly in this directory (nested files belong to
    /// sub-packages), sorted.
    pub source_files: Vec<PathBuf>,
    /// Names of discovered packages this one imports.
    pub imports: Vec<String>,
}

impl PackageInfo {
    pub fn source_file_count(&self) -> usize {
        self.source_files.len()
    }
}

/// Discover the packages under `source_dir` and return them in compile order
/// (imports first).
///
/// Import edges are inferred by a line scan for `import <dotted.name>` and
/// intersected with the set of discovered package names; imports of anything
/// else are third-party and satisfied by resolved dependency artifacts.
///
/// # Errors
/// Returns `SourceDirMissing` when the directory does not exist and
/// `IntraProjectCycle` when packages import each other cyclically.
pub fn discover_packages(
    fs: &dyn FileSystem,
    source_dir: &Path,
    project_name: &str,
) -> Result<Vec<PackageInfo>, EngineError> {
    if !fs.is_dir(source_dir) {
        return Err(EngineError::SourceDirMissing {
            dir: source_dir.display().to_string(),
        });
    }

    let mut packages = Vec::new();
    let mut rel = Vec::new();
    walk(fs, source_dir, project_name, &mut rel, &mut packages)?;

    let names: BTreeSet<String> = packages.iter().map(|p| p.name.clone()).collect();
    for package in &mut packages {
        let mut imports = BTreeSet::new();
        for file in &package.source_files {
            for line in fs.read_text(file)?.lines() {
                if let Some(import) = parse_import(line) {
                    if names.contains(&import) && import != package.name {
                        imports.insert(import);
                    }
                }
            }
        }
        package.imports = imports.into_iter().collect();
    }

    sort_by_compile_order(packages)
}

fn walk(
    fs: &dyn FileSystem,
    dir: &Path,
    project_name: &str,
    rel: &mut Vec<String>,
    out: &mut Vec<PackageInfo>,
) -> Result<(), EngineError> {
    let entries = fs.list_dir(dir)?;

    let source_files: Vec<PathBuf> = entries
        .iter()
        .filter(|path| {
            fs.is_file(path)
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e == SOURCE_EXTENSION)
        })
        .cloned()
        .collect();

    if !source_files.is_empty() {
        let name = if rel.is_empty() {
            project_name.to_owned()
        } else {
            rel.join(".")
        };
        out.push(PackageInfo {
            name,
            path: dir.to_path_buf(),
            source_files,
            imports: Vec::new(),
        });
    }

    for entry in entries.iter().filter(|path| fs.is_dir(path)) {
        let Some(dir_name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if dir_name.starts_with('.') {
            continue;
        }
        rel.push(dir_name.to_owned());
        walk(fs, entry, project_name, rel, out)?;
        rel.pop();
    }

    Ok(())
}

fn sort_by_compile_order(packages: Vec<PackageInfo>) -> Result<Vec<PackageInfo>, EngineError> {
    let nodes: Vec<String> = packages.iter().map(|p| p.name.clone()).collect();
    let edges: BTreeMap<String, Vec<String>> = packages
        .iter()
        .map(|p| (p.name.clone(), p.imports.clone()))
        .collect();

    let order = graph::topo_sort(&nodes, &edges)
        .map_err(|cycle| EngineError::IntraProjectCycle { path: cycle.path })?;

    let mut by_name: BTreeMap<String, PackageInfo> =
        packages.into_iter().map(|p| (p.name.clone(), p)).collect();
    Ok(order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect())
}

/// Parse an `import` line: optional leading whitespace, the keyword, then a
/// dotted identifier.
fn parse_import(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix("import")?;
    if !rest.chars().next()?.is_whitespace() {
        return None; // e.g. `imported(...)`
    }
    let ident: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        .collect();
    let ident = ident.trim_end_matches('.');
    if ident.is_empty() {
        None
    } else {
        Some(ident.to_owned())
    }
}
