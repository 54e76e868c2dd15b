//! Allowlist policy gate (spec.md §4.3), generalized from the teacher's
//! platform-trust policy (`aof-triggers/src/safety/policy.rs`'s
//! `PlatformPolicy`/`PolicyDecision`) into spec.md's resource-allowlist
//! vocabulary: filesystem, shell, and HTTP tools are gated on an explicit
//! allowlist of paths, commands, or host patterns rather than a platform
//! trust tier.

use conclave_core::{ConclaveError, ConclaveResult};
use std::path::Path;

/// Outcome of a [`ToolPolicy`] check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Denied { reason: String },
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Convert a denial into `ConclaveError::policy_denied`; a no-op (never
    /// called) when allowed.
    pub fn into_result(self) -> ConclaveResult<()> {
        match self {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Denied { reason } => Err(ConclaveError::policy_denied(reason)),
        }
    }
}

/// An explicit resource allowlist bound to one tool instance at
/// construction time (spec.md §4.3: "Construction without an allowlist
/// fails immediately with `kind=configuration_error`").
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    allowed: Vec<String>,
}

impl ToolPolicy {
    pub fn new(allowed: Vec<String>) -> ConclaveResult<Self> {
        if allowed.is_empty() {
            return Err(ConclaveError::configuration_error(
                "tool requires a non-empty allowlist",
            ));
        }
        Ok(Self { allowed })
    }

    /// Path-prefix match: `path` is allowed if it lies under any allowlisted
    /// directory. Both sides are compared lexically (no canonicalization),
    /// matching the teacher's pattern of trusting already-validated config.
    pub fn check_path(&self, path: &Path) -> PolicyDecision {
        let allowed = self
            .allowed
            .iter()
            .any(|prefix| path.starts_with(Path::new(prefix)));
        if allowed {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Denied {
                reason: format!(
                    "path {:?} is outside the configured allowlist {:?}",
                    path, self.allowed
                ),
            }
        }
    }

    /// Exact-value match, used for shell command allowlists.
    pub fn check_exact(&self, value: &str) -> PolicyDecision {
        if self.allowed.iter().any(|a| a == value) {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Denied {
                reason: format!(
                    "{:?} is not in the configured allowlist {:?}",
                    value, self.allowed
                ),
            }
        }
    }

    /// Host-pattern match: an allowlist entry of `*.example.com` matches
    /// any subdomain; an entry without a leading `*.` must match exactly.
    pub fn check_host(&self, host: &str) -> PolicyDecision {
        let allowed = self.allowed.iter().any(|pattern| match pattern.strip_prefix("*.") {
            Some(suffix) => host == suffix || host.ends_with(&format!(".{suffix}")),
            None => host == pattern,
        });
        if allowed {
            PolicyDecision::Allow
        } else {
            PolicyDecision::Denied {
                reason: format!(
                    "host {:?} does not match the configured allowlist {:?}",
                    host, self.allowed
                ),
            }
        }
    }
}

/// Shell metacharacters that would change meaning if a shell ever
/// re-interpreted the argument (spec.md §4.3: arguments are passed as an
/// array and never interpolated into a shell string, but a literal
/// metacharacter in an arg is still rejected by default since it usually
/// signals an injection attempt upstream).
pub const SHELL_METACHARACTERS: &[char] = &['|', '&', ';', '$', '`', '\n', '>', '<', '(', ')'];

pub fn contains_shell_metacharacters(arg: &str) -> bool {
    arg.chars().any(|c| SHELL_METACHARACTERS.contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_is_rejected_at_construction() {
        let err = ToolPolicy::new(vec![]).unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn path_prefix_match() {
        let policy = ToolPolicy::new(vec!["/workspace".into()]).unwrap();
        assert!(policy.check_path(Path::new("/workspace/foo.txt")).is_allowed());
        assert!(!policy.check_path(Path::new("/etc/passwd")).is_allowed());
    }

    #[test]
    fn host_wildcard_match() {
        let policy = ToolPolicy::new(vec!["*.example.com".into()]).unwrap();
        assert!(policy.check_host("api.example.com").is_allowed());
        assert!(policy.check_host("example.com").is_allowed());
        assert!(!policy.check_host("example.org").is_allowed());
    }

    #[test]
    fn metacharacter_detection() {
        assert!(contains_shell_metacharacters("rm -rf / ; echo done"));
        assert!(!contains_shell_metacharacters("--verbose"));
    }
}
