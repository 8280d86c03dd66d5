//! Path normalization and safety checks
//!
//! Accepts three surface forms (native POSIX, Windows-style backslash
//! paths, and the WSL UNC form), folds them to a canonical absolute POSIX
//! path, and rejects anything that escapes the operator-configured
//! workspace root, touches a restricted system prefix, or crosses a
//! blocked directory segment.

use crate::error::{RouteError, RouteResult};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Directory segments that are never served. The check is segment-equal,
/// never substring: `build` is blocked, `build_scripts.go` is not.
pub const BLOCKED_SEGMENTS: &[&str] = &["node_modules", ".git", "dist", "build", "__pycache__"];

/// Absolute prefixes that are never served regardless of workspace root.
pub const RESTRICTED_PREFIXES: &[&str] = &["/etc", "/proc", "/sys"];

/// The remote-filesystem UNC prefix recognized on input.
const WSL_PREFIX: &str = r"\\wsl.localhost\Ubuntu";

/// One named safety check in a diagnosis report.
#[derive(Debug, Clone, Serialize)]
pub struct SafetyCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Structured pass/fail report for every path safety check.
#[derive(Debug, Clone, Serialize)]
pub struct PathDiagnosis {
    pub input: String,
    pub resolved: Option<String>,
    pub checks: Vec<SafetyCheck>,
}

/// Workspace-scoped path resolver.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    workspace_root: PathBuf,
}

impl PathPolicy {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Resolve an input path to a canonical absolute path, or reject it.
    ///
    /// Resolution is idempotent: feeding the output back in returns the
    /// same path.
    pub fn resolve(&self, input: &str) -> RouteResult<PathBuf> {
        if input.trim().is_empty() {
            return Err(RouteError::InvalidRequest(
                "path cannot be empty".to_string(),
            ));
        }

        let folded = fold_surface_form(input);
        let normalized = self.normalize(&folded)?;

        for prefix in RESTRICTED_PREFIXES {
            if normalized == Path::new(prefix) || normalized.starts_with(prefix) {
                return Err(RouteError::Rejected {
                    path: input.to_string(),
                    reason: format!("path is under restricted prefix {}", prefix),
                });
            }
        }

        if !normalized.starts_with(&self.workspace_root) {
            return Err(RouteError::Rejected {
                path: input.to_string(),
                reason: format!(
                    "path resolves outside workspace root {}",
                    self.workspace_root.display()
                ),
            });
        }

        for component in normalized.components() {
            if let std::path::Component::Normal(seg) = component {
                let seg = seg.to_string_lossy();
                if BLOCKED_SEGMENTS.iter().any(|b| *b == seg) {
                    return Err(RouteError::Rejected {
                        path: input.to_string(),
                        reason: format!("path crosses blocked segment '{}'", seg),
                    });
                }
            }
        }

        Ok(normalized)
    }

    /// Lexically normalize: collapse separators, resolve `.` and `..`.
    /// A `..` that would climb above the filesystem root is a rejection,
    /// not a silent clamp.
    fn normalize(&self, folded: &str) -> RouteResult<PathBuf> {
        let absolute = if folded.starts_with('/') {
            folded.to_string()
        } else {
            format!("{}/{}", self.workspace_root.display(), folded)
        };

        let mut parts: Vec<&str> = Vec::new();
        for segment in absolute.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if parts.pop().is_none() {
                        return Err(RouteError::Rejected {
                            path: folded.to_string(),
                            reason: "path climbs above the filesystem root".to_string(),
                        });
                    }
                }
                other => parts.push(other),
            }
        }

        Ok(PathBuf::from(format!("/{}", parts.join("/"))))
    }

    /// Run every check independently and report each outcome.
    pub fn diagnose(&self, input: &str) -> PathDiagnosis {
        let mut checks = Vec::new();

        let folded = fold_surface_form(input);
        let surface = if input.starts_with(WSL_PREFIX) {
            "wsl_unc"
        } else if input.contains('\\') {
            "windows"
        } else {
            "posix"
        };
        checks.push(SafetyCheck {
            name: "surface_form",
            passed: true,
            detail: format!("detected {} form, folded to '{}'", surface, folded),
        });

        let normalized = match self.normalize(&folded) {
            Ok(p) => {
                checks.push(SafetyCheck {
                    name: "normalization",
                    passed: true,
                    detail: format!("normalized to '{}'", p.display()),
                });
                Some(p)
            }
            Err(e) => {
                checks.push(SafetyCheck {
                    name: "normalization",
                    passed: false,
                    detail: e.to_string(),
                });
                None
            }
        };

        if let Some(p) = &normalized {
            let restricted = RESTRICTED_PREFIXES
                .iter()
                .find(|prefix| p.starts_with(prefix));
            checks.push(SafetyCheck {
                name: "restricted_prefix",
                passed: restricted.is_none(),
                detail: match restricted {
                    Some(prefix) => format!("under restricted prefix {}", prefix),
                    None => "no restricted prefix".to_string(),
                },
            });

            let contained = p.starts_with(&self.workspace_root);
            checks.push(SafetyCheck {
                name: "workspace_containment",
                passed: contained,
                detail: if contained {
                    format!("inside workspace root {}", self.workspace_root.display())
                } else {
                    format!("outside workspace root {}", self.workspace_root.display())
                },
            });

            let blocked = p.components().find_map(|c| match c {
                std::path::Component::Normal(seg) => {
                    let seg = seg.to_string_lossy().into_owned();
                    BLOCKED_SEGMENTS.iter().any(|b| *b == seg).then_some(seg)
                }
                _ => None,
            });
            checks.push(SafetyCheck {
                name: "blocked_segment",
                passed: blocked.is_none(),
                detail: match blocked {
                    Some(seg) => format!("crosses blocked segment '{}'", seg),
                    None => "no blocked segments".to_string(),
                },
            });
        }

        PathDiagnosis {
            input: input.to_string(),
            resolved: normalized.map(|p| p.display().to_string()),
            checks,
        }
    }
}

/// Fold the three accepted surface forms down to forward-slash form.
fn fold_surface_form(input: &str) -> String {
    let stripped = input.strip_prefix(WSL_PREFIX).unwrap_or(input);

    if stripped.contains('\\') {
        // Windows-style: drop a drive prefix, fold separators.
        let no_drive = if stripped.len() >= 2 && stripped.as_bytes()[1] == b':' {
            &stripped[2..]
        } else {
            stripped
        };
        no_drive.replace('\\', "/")
    } else {
        stripped.to_string()
    }
}
