//! Package source strings: the scheme-prefixed URLs recorded in lock files.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A git ref a dependency is pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GitReference {
    Tag(String),
    Branch(String),
    Commit(String),
}

impl GitReference {
    /// The ref used when a git dependency declares none.
    pub fn default_branch() -> Self {
        GitReference::Branch("main".to_owned())
    }

    /// The query key this ref is serialized under (`tag`, `branch`, `commit`).
    pub fn kind(&self) -> &'static str {
        match self {
            GitReference::Tag(_) => "tag",
            GitReference::Branch(_) => "branch",
            GitReference::Commit(_) => "commit",
        }
    }

    /// The ref value (tag name, branch name, or commit hash).
    pub fn value(&self) -> &str {
        match self {
            GitReference::Tag(v) | GitReference::Branch(v) | GitReference::Commit(v) => v,
        }
    }
}

/// Where a locked package came from.
///
/// Serialized as a URL-like string with a scheme prefix:
/// `registry+<url>`, `path+<relpath>`, or
/// `git+<url>?<kind>=<value>#<resolved-commit>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    Registry {
        url: String,
    },
    Path {
        path: String,
    },
    Git {
        url: String,
        reference: GitReference,
        resolved_commit: Option<String>,
    },
}

/// A source string that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid package source `{input}`: {reason}")]
pub struct SourceParseError {
    pub input: String,
    pub reason: String,
}

impl PackageSource {
    /// Parse a scheme-prefixed source string.
    ///
    /// # Errors
    /// Returns an error naming the offending string if the scheme is
    /// unrecognized or the remainder is malformed.
    pub fn parse(input: &str) -> Result<Self, SourceParseError> {
        if let Some(url) = input.strip_prefix("registry+") {
            if url.is_empty() {
                return Err(malformed(input, "empty registry url"));
            }
            return Ok(PackageSource::Registry {
                url: url.to_owned(),
            });
        }
        if let Some(path) = input.strip_prefix("path+") {
            if path.is_empty() {
                return Err(malformed(input, "empty path"));
            }
            return Ok(PackageSource::Path {
                path: path.to_owned(),
            });
        }
        if let Some(rest) = input.strip_prefix("git+") {
            return parse_git(input, rest);
        }
        Err(malformed(
            input,
            "unrecognized scheme (expected registry+, path+, or git+)",
        ))
    }
}

fn malformed(input: &str, reason: &str) -> SourceParseError {
    SourceParseError {
        input: input.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse_git(input: &str, rest: &str) -> Result<PackageSource, SourceParseError> {
    // The resolved commit rides in the fragment and is optional on input.
    let (head, resolved_commit) = match rest.rsplit_once('#') {
        Some((head, commit)) if !commit.is_empty() => (head, Some(commit.to_owned())),
        Some((head, _)) => (head, None),
        None => (rest, None),
    };

    let (url, query) = match head.split_once('?') {
        Some((url, query)) => (url, Some(query)),
        None => (head, None),
    };
    if url.is_empty() {
        return Err(malformed(input, "empty git url"));
    }

    let reference = match query {
        Some(query) => {
            let mut tag = None;
            let mut branch = None;
            let mut commit = None;
            for pair in query.split('&') {
                let Some((key, value)) = pair.split_once('=') else {
                    return Err(malformed(input, "malformed query pair"));
                };
                match key {
                    "tag" => tag = Some(value),
                    "branch" => branch = Some(value),
                    "commit" => commit = Some(value),
                    _ => {}
                }
            }
            // Ref kind is chosen by the present key, in tag/branch/commit priority.
            if let Some(v) = tag {
                GitReference::Tag(v.to_owned())
            } else if let Some(v) = branch {
                GitReference::Branch(v.to_owned())
            } else if let Some(v) = commit {
                GitReference::Commit(v.to_owned())
            } else {
                GitReference::default_branch()
            }
        }
        None => GitReference::default_branch(),
    };

    Ok(PackageSource::Git {
        url: url.to_owned(),
        reference,
        resolved_commit,
    })
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackageSource::Registry { url } => write!(f, "registry+{url}"),
            PackageSource::Path { path } => write!(f, "path+{path}"),
            PackageSource::Git {
                url,
                reference,
                resolved_commit,
            } => {
                write!(f, "git+{url}?{}={}", reference.kind(), reference.value())?;
                if let Some(commit) = resolved_commit {
                    write!(f, "#{commit}")?;
                }
                Ok(())
            }
        }
    }
}

impl Serialize for PackageSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PackageSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PackageSource::parse(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_registry() {
        let source = PackageSource::parse("registry+https://repo.example.com").unwrap();
        assert_eq!(
            source,
            PackageSource::Registry {
                url: "https://repo.example.com".to_owned()
            }
        );
    }

    #[test]
    fn parse_path() {
        let source = PackageSource::parse("path+../lib-a").unwrap();
        assert_eq!(
            source,
            PackageSource::Path {
                path: "../lib-a".to_owned()
            }
        );
    }

    #[test]
    fn parse_git_tag_with_commit() {
        let source = PackageSource::parse("git+https://github.com/u/r?tag=v1.0.0#abc123").unwrap();
        assert_eq!(
            source,
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::Tag("v1.0.0".to_owned()),
                resolved_commit: Some("abc123".to_owned()),
            }
        );
    }

    #[test]
    fn parse_git_branch_without_commit() {
        let source = PackageSource::parse("git+https://github.com/u/r?branch=dev").unwrap();
        assert_eq!(
            source,
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::Branch("dev".to_owned()),
                resolved_commit: None,
            }
        );
    }

    #[test]
    fn parse_git_commit_ref() {
        let source = PackageSource::parse("git+https://github.com/u/r?commit=deadbeef").unwrap();
        assert_eq!(
            source,
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::Commit("deadbeef".to_owned()),
                resolved_commit: None,
            }
        );
    }

    #[test]
    fn parse_git_without_query_defaults_to_main() {
        let source = PackageSource::parse("git+https://github.com/u/r").unwrap();
        assert_eq!(
            source,
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::default_branch(),
                resolved_commit: None,
            }
        );
    }

    #[test]
    fn tag_wins_over_branch_and_commit() {
        let source =
            PackageSource::parse("git+https://github.com/u/r?commit=abc&branch=dev&tag=v2")
                .unwrap();
        match source {
            PackageSource::Git { reference, .. } => {
                assert_eq!(reference, GitReference::Tag("v2".to_owned()));
            }
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn unknown_scheme_rejected() {
        let err = PackageSource::parse("svn+https://example.com/repo").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("svn+https://example.com/repo"), "was: {msg}");
        assert!(msg.contains("scheme"), "was: {msg}");
    }

    #[test]
    fn empty_url_rejected() {
        assert!(PackageSource::parse("registry+").is_err());
        assert!(PackageSource::parse("path+").is_err());
        assert!(PackageSource::parse("git+").is_err());
    }

    #[test]
    fn display_round_trip_all_variants() {
        let sources = [
            PackageSource::Registry {
                url: "https://repo.example.com".to_owned(),
            },
            PackageSource::Path {
                path: "libs/util".to_owned(),
            },
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::Tag("v1.0.0".to_owned()),
                resolved_commit: Some("abc123".to_owned()),
            },
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::Branch("main".to_owned()),
                resolved_commit: None,
            },
            PackageSource::Git {
                url: "https://github.com/u/r".to_owned(),
                reference: GitReference::Commit("deadbeef".to_owned()),
                resolved_commit: None,
            },
        ];
        for source in sources {
            let reparsed = PackageSource::parse(&source.to_string()).unwrap();
            assert_eq!(source, reparsed);
        }
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_reference() -> impl Strategy<Value = GitReference> {
            let value = "[a-zA-Z0-9][a-zA-Z0-9._/-]{0,20}";
            prop_oneof![
                value.prop_map(|v| GitReference::Tag(v)),
                value.prop_map(|v| GitReference::Branch(v)),
                "[a-f0-9]{7,40}".prop_map(|v| GitReference::Commit(v)),
            ]
        }

        fn arb_source() -> impl Strategy<Value = PackageSource> {
            let url = "https://[a-z][a-z0-9.-]{0,20}/[a-z0-9/-]{0,20}";
            prop_oneof![
                url.prop_map(|url| PackageSource::Registry { url }),
                "[a-zA-Z0-9._/-]{1,30}".prop_map(|path| PackageSource::Path { path }),
                (url, arb_reference(), proptest::option::of("[a-f0-9]{7,40}")).prop_map(
                    |(url, reference, resolved_commit)| PackageSource::Git {
                        url,
                        reference,
                        resolved_commit,
                    }
                ),
            ]
        }

        proptest! {
            #[test]
            #[allow(clippy::unwrap_used)]
            fn source_string_round_trip(source in arb_source()) {
                let reparsed = PackageSource::parse(&source.to_string()).unwrap();
                prop_assert_eq!(source, reparsed);
            }

            #[test]
            fn parse_never_panics(input in "\\PC{0,80}") {
                let _ = PackageSource::parse(&input);
            }
        }
    }
}
