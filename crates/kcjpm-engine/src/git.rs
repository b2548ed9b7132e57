//! Git dependency acquisition via the `git` command line.

use std::path::Path;

use kcjpm_config::manifest::DependencySpec;
use kcjpm_config::source::GitReference;

use crate::cache::CacheSlot;
use crate::error::EngineError;
use crate::fetch::{DependencyFetcher, FetchContext, FetchMode, Fetched};

/// Fetches git dependencies into `cache/git/<slug(url)>/<ref>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitFetcher;

impl DependencyFetcher for GitFetcher {
    fn supports(&self, spec: &DependencySpec) -> bool {
        matches!(spec, DependencySpec::Git { .. })
    }

    fn fetch(
        &self,
        name: &str,
        spec: &DependencySpec,
        _parent_root: &Path,
        ctx: &FetchContext<'_>,
    ) -> Result<Fetched, EngineError> {
        let DependencySpec::Git { url, reference, .. } = spec else {
            return Err(EngineError::DependencyNotFound {
                name: name.to_owned(),
                location: "<not a git dependency>".to_owned(),
            });
        };

        let slot = CacheSlot::new(
            ctx.cache_root
                .join("git")
                .join(slug(url))
                .join(sanitize_ref(reference.value())),
        );

        if ctx.mode == FetchMode::Validate {
            check_accessible(name, url, reference, ctx)?;
            return Ok(Fetched {
                location: slot.dir().to_path_buf(),
                resolved_commit: None,
                checksum: None,
                registry_url: None,
            });
        }

        let _lock = slot.lock()?;
        if slot.is_complete() {
            return Ok(Fetched {
                location: slot.dir().to_path_buf(),
                resolved_commit: slot.completion_note(),
                checksum: None,
                registry_url: None,
            });
        }

        let staging = slot.staging_dir();
        ctx.fs.remove_dir_all(&staging)?;

        clone_into(url, reference, &staging, ctx)?;
        let commit = rev_parse_head(url, &staging, ctx)?;

        // The checkout is a plain source tree in the cache; drop the repo.
        ctx.fs.remove_dir_all(&staging.join(".git"))?;

        slot.commit(&commit)?;
        Ok(Fetched {
            location: slot.dir().to_path_buf(),
            resolved_commit: Some(commit),
            checksum: None,
            registry_url: None,
        })
    }
}

fn clone_into(
    url: &str,
    reference: &GitReference,
    staging: &Path,
    ctx: &FetchContext<'_>,
) -> Result<(), EngineError> {
    let staging_str = staging.display().to_string();

    // Tags and branches allow a shallow clone; a commit needs full history
    // before it can be checked out.
    let clone_argv: Vec<String> = match reference {
        GitReference::Tag(value) | GitReference::Branch(value) => [
            "git",
            "clone",
            "--depth",
            "1",
            "--branch",
            value.as_str(),
            url,
            staging_str.as_str(),
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect(),
        GitReference::Commit(_) => ["git", "clone", url, staging_str.as_str()]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
    };

    let output = ctx.executor.execute(&clone_argv, None, &[])?;
    if !output.success {
        return Err(git_unreachable(url, &output.stderr));
    }

    if let GitReference::Commit(commit) = reference {
        let argv: Vec<String> = [
            "git",
            "-C",
            staging_str.as_str(),
            "checkout",
            "--detach",
            commit.as_str(),
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        let output = ctx.executor.execute(&argv, None, &[])?;
        if !output.success {
            return Err(git_unreachable(url, &output.stderr));
        }
    }

    Ok(())
}

fn rev_parse_head(url: &str, staging: &Path, ctx: &FetchContext<'_>) -> Result<String, EngineError> {
    let staging_str = staging.display().to_string();
    let argv: Vec<String> = ["git", "-C", staging_str.as_str(), "rev-parse", "HEAD"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    let output = ctx.executor.execute(&argv, None, &[])?;
    if !output.success {
        return Err(git_unreachable(url, &output.stderr));
    }
    Ok(output.stdout.trim().to_owned())
}

/// Read-only accessibility probe used in validate mode.
fn check_accessible(
    name: &str,
    url: &str,
    reference: &GitReference,
    ctx: &FetchContext<'_>,
) -> Result<(), EngineError> {
    let mut argv: Vec<String> = ["git", "ls-remote", url]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    let refspec = match reference {
        GitReference::Tag(value) => Some(format!("refs/tags/{value}")),
        GitReference::Branch(value) => Some(format!("refs/heads/{value}")),
        // A commit hash cannot be listed remotely; reachability of the
        // repository itself is the best preflight available.
        GitReference::Commit(_) => None,
    };
    let listed_ref = refspec.is_some();
    if let Some(refspec) = refspec {
        argv.push(refspec);
    }

    let output = ctx.executor.execute(&argv, None, &[])?;
    if !output.success {
        return Err(git_unreachable(url, &output.stderr));
    }
    if listed_ref && output.stdout.trim().is_empty() {
        return Err(EngineError::DependencyNotFound {
            name: name.to_owned(),
            location: format!("{url} ({} {})", reference.kind(), reference.value()),
        });
    }
    Ok(())
}

fn git_unreachable(url: &str, stderr: &str) -> EngineError {
    let message = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("git exited with an error")
        .trim()
        .to_owned();
    EngineError::GitUnreachable {
        url: url.to_owned(),
        message,
    }
}

/// Deterministic directory name for a repository URL.
pub(crate) fn slug(url: &str) -> String {
    let stripped = url.split_once("://").map_or(url, |(_, rest)| rest);
    let mut out = String::with_capacity(stripped.len());
    let mut last_dash = false;
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_owned()
}

/// Ref values may contain path separators (`release/v1`); flatten them.
fn sanitize_ref(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use kcjpm_util::fs::HostFileSystem;
    use kcjpm_util::process::HostProcessExecutor;
    use kcjpm_util::ProcessExecutor;

    use crate::registry::UreqClient;

    use super::*;

    #[test]
    fn slug_is_stable_and_filesystem_safe() {
        assert_eq!(
            slug("https://github.com/user/repo.git"),
            "github-com-user-repo-git"
        );
        assert_eq!(slug("git@host:path"), "git-host-path");
        assert_eq!(slug("https://Example.COM//a"), "example-com-a");
    }

    #[test]
    fn sanitize_ref_flattens_separators() {
        assert_eq!(sanitize_ref("release/v1.0"), "release-v1.0");
        assert_eq!(sanitize_ref("v1.0.0"), "v1.0.0");
    }

    // The remaining tests shell out to a real `git` binary; they skip
    // silently when git is unavailable.
    fn git_available() -> bool {
        HostProcessExecutor
            .execute(&["git".to_owned(), "--version".to_owned()], None, &[])
            .map(|o| o.success)
            .unwrap_or(false)
    }

    /// Create a local repository with one commit on `main` and return its path.
    fn init_repo(dir: &Path) -> PathBuf {
        let repo = dir.join("upstream");
        fs::create_dir_all(repo.join("src")).unwrap();
        fs::write(
            repo.join("kcjpm.toml"),
            "[package]\nname = \"upstream\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();
        fs::write(repo.join("src/lib.cj"), "// lib").unwrap();

        let run = |args: &[&str]| {
            let argv: Vec<String> = args.iter().map(|s| (*s).to_owned()).collect();
            let out = HostProcessExecutor
                .execute(&argv, Some(repo.as_path()), &[])
                .unwrap();
            assert!(out.success, "git failed: {} — {}", args.join(" "), out.stderr);
        };
        run(&["git", "init", "--quiet", "--initial-branch", "main", "."]);
        run(&["git", "config", "user.email", "test@example.com"]);
        run(&["git", "config", "user.name", "Test"]);
        run(&["git", "add", "."]);
        run(&["git", "commit", "--quiet", "-m", "initial"]);
        repo
    }

    #[test]
    fn fetch_branch_checks_out_and_records_commit() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        let cache = tmp.path().join("cache");

        let fs_impl = HostFileSystem;
        let executor = HostProcessExecutor;
        let http = UreqClient::default();
        let ctx = FetchContext {
            project_root: tmp.path(),
            cache_root: &cache,
            fs: &fs_impl,
            executor: &executor,
            http: &http,
            mode: FetchMode::Install,
        };

        let spec = DependencySpec::Git {
            version: None,
            url: repo.display().to_string(),
            reference: GitReference::Branch("main".to_owned()),
            optional: false,
        };
        let fetched = GitFetcher.fetch("upstream", &spec, tmp.path(), &ctx).unwrap();

        assert!(fetched.location.join("kcjpm.toml").is_file());
        assert!(!fetched.location.join(".git").exists());
        let commit = fetched.resolved_commit.unwrap();
        assert_eq!(commit.len(), 40, "expected a full sha, got: {commit}");

        // A second fetch reuses the cache and reports the same commit.
        let again = GitFetcher.fetch("upstream", &spec, tmp.path(), &ctx).unwrap();
        assert_eq!(again.location, fetched.location);
        assert_eq!(again.resolved_commit.as_deref(), Some(commit.as_str()));
    }

    #[test]
    fn fetch_unreachable_url_errors() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let cache = tmp.path().join("cache");

        let fs_impl = HostFileSystem;
        let executor = HostProcessExecutor;
        let http = UreqClient::default();
        let ctx = FetchContext {
            project_root: tmp.path(),
            cache_root: &cache,
            fs: &fs_impl,
            executor: &executor,
            http: &http,
            mode: FetchMode::Install,
        };

        let spec = DependencySpec::Git {
            version: None,
            url: tmp.path().join("no-such-repo").display().to_string(),
            reference: GitReference::Branch("main".to_owned()),
            optional: false,
        };
        let err = GitFetcher.fetch("ghost", &spec, tmp.path(), &ctx).unwrap_err();
        assert!(matches!(err, EngineError::GitUnreachable { .. }), "was: {err}");
    }

    #[test]
    fn validate_mode_probes_without_populating() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());
        let cache = tmp.path().join("cache");

        let fs_impl = HostFileSystem;
        let executor = HostProcessExecutor;
        let http = UreqClient::default();
        let ctx = FetchContext {
            project_root: tmp.path(),
            cache_root: &cache,
            fs: &fs_impl,
            executor: &executor,
            http: &http,
            mode: FetchMode::Validate,
        };

        let spec = DependencySpec::Git {
            version: None,
            url: repo.display().to_string(),
            reference: GitReference::Branch("main".to_owned()),
            optional: false,
        };
        let fetched = GitFetcher.fetch("upstream", &spec, tmp.path(), &ctx).unwrap();
        assert!(!fetched.location.exists(), "validate must not populate");

        // A missing branch is reported as not found.
        let bad = DependencySpec::Git {
            version: None,
            url: repo.display().to_string(),
            reference: GitReference::Branch("no-such-branch".to_owned()),
            optional: false,
        };
        let err = GitFetcher.fetch("upstream", &bad, tmp.path(), &ctx).unwrap_err();
        assert!(
            matches!(err, EngineError::DependencyNotFound { .. }),
            "was: {err}"
        );
    }
}
