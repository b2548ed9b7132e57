#![forbid(unsafe_code)]
//! Host detection and target triple mapping for kcjpm.
//!
//! Maps Rust compile-time platform information to Cangjie compiler target
//! names and validates user-supplied `--target` values. The triple is
//! forwarded verbatim to the compiler.

use std::fmt;
use std::str::FromStr;

/// All compiler targets kcjpm knows how to drive.
const KNOWN_TARGETS: &[&str] = &[
    "linux_x64",
    "linux_arm64",
    "windows_x64",
    "macos_x64",
    "macos_arm64",
];

/// A Cangjie compilation target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    triple: String,
}

impl Target {
    /// Returns the string passed to `cjc --target`.
    pub fn to_cjc_arg(&self) -> &str {
        &self.triple
    }

    /// File-name suffix of executables produced for this target.
    pub fn executable_suffix(&self) -> &'static str {
        if self.triple.starts_with("windows") {
            ".exe"
        } else {
            ""
        }
    }

    /// Returns `true` if this target matches the current host platform.
    ///
    /// # Errors
    /// Returns an error if the current host platform is unsupported.
    pub fn is_host(&self) -> Result<bool, TargetError> {
        let host = host_target()?;
        Ok(self == &host)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    /// Parse and validate a user-supplied target string.
    ///
    /// # Errors
    /// Returns `TargetError::InvalidTarget` if the string is not a known target.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if KNOWN_TARGETS.contains(&s) {
            Ok(Target {
                triple: s.to_owned(),
            })
        } else {
            Err(TargetError::InvalidTarget { name: s.to_owned() })
        }
    }
}

/// Detect the host target triple.
///
/// # Errors
/// Returns an error if the current OS/arch combination is not supported.
pub fn host_target() -> Result<Target, TargetError> {
    let triple = match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => "linux_x64",
        ("linux", "aarch64") => "linux_arm64",
        ("windows", "x86_64") => "windows_x64",
        ("macos", "x86_64") => "macos_x64",
        ("macos", "aarch64") => "macos_arm64",
        (os, arch) => {
            return Err(TargetError::UnsupportedHost {
                os: os.to_owned(),
                arch: arch.to_owned(),
            })
        }
    };
    Ok(Target {
        triple: triple.to_owned(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("unsupported host: {os}/{arch} — no Cangjie target exists for this platform")]
    UnsupportedHost { os: String, arch: String },

    #[error(
        "unknown target `{name}`, supported targets: {}",
        KNOWN_TARGETS.join(", ")
    )]
    InvalidTarget { name: String },
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn host_target_returns_valid_known_target() {
        let target = match host_target() {
            Ok(t) => t,
            Err(_) => return, // skip on unsupported platforms
        };
        assert!(
            KNOWN_TARGETS.contains(&target.to_cjc_arg()),
            "host_target() returned `{target}` which is not in KNOWN_TARGETS"
        );
    }

    #[test]
    fn from_str_accepts_all_known_targets() {
        for &name in KNOWN_TARGETS {
            let target = Target::from_str(name);
            assert!(target.is_ok(), "from_str rejected known target `{name}`");
            let target = match target {
                Ok(t) => t,
                Err(_) => continue,
            };
            assert_eq!(target.to_cjc_arg(), name);
        }
    }

    #[test]
    fn from_str_rejects_invalid_target() {
        assert!(Target::from_str("freebsd_x64").is_err());
    }

    #[test]
    fn from_str_rejects_empty_string() {
        assert!(Target::from_str("").is_err());
    }

    #[test]
    fn invalid_target_error_lists_supported_targets() {
        let msg = match Target::from_str("bsd_x64") {
            Err(e) => e.to_string(),
            Ok(_) => panic!("expected error"), // only in test code
        };
        for &name in KNOWN_TARGETS {
            assert!(
                msg.contains(name),
                "error message should list `{name}`, got: {msg}"
            );
        }
    }

    #[test]
    fn display_format_matches_triple() {
        let target = match Target::from_str("linux_x64") {
            Ok(t) => t,
            Err(_) => return,
        };
        assert_eq!(format!("{target}"), "linux_x64");
    }

    #[test]
    fn windows_targets_get_exe_suffix() {
        let windows = match Target::from_str("windows_x64") {
            Ok(t) => t,
            Err(_) => return,
        };
        assert_eq!(windows.executable_suffix(), ".exe");

        let linux = match Target::from_str("linux_x64") {
            Ok(t) => t,
            Err(_) => return,
        };
        assert_eq!(linux.executable_suffix(), "");
    }

    #[test]
    fn is_host_matches_host_target() {
        let host = match host_target() {
            Ok(t) => t,
            Err(_) => return,
        };
        let result = match host.is_host() {
            Ok(v) => v,
            Err(_) => return,
        };
        assert!(result, "is_host() should return true for host_target()");
    }

    #[test]
    fn is_host_returns_false_for_non_host() {
        let non_host_name = if cfg!(target_os = "linux") {
            "macos_arm64"
        } else {
            "linux_x64"
        };
        let target = match Target::from_str(non_host_name) {
            Ok(t) => t,
            Err(_) => return,
        };
        let result = match target.is_host() {
            Ok(v) => v,
            Err(_) => return,
        };
        assert!(
            !result,
            "is_host() should return false for `{non_host_name}` on this platform"
        );
    }

    #[test]
    fn target_equality() {
        let a = Target::from_str("linux_x64");
        let b = Target::from_str("linux_x64");
        assert_eq!(a.ok(), b.ok());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Arbitrary strings never panic the parser and only the known
            /// triples are accepted.
            #[test]
            fn from_str_total(name in "\\PC{0,30}") {
                let parsed = Target::from_str(&name);
                prop_assert_eq!(parsed.is_ok(), KNOWN_TARGETS.contains(&name.as_str()));
            }
        }
    }
}
