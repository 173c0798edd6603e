//! Error types for pinenv operations.
//!
//! Domain failures that callers need to tell apart (to pick an exit code or to
//! report the implicated packages) get a typed error here. Command functions
//! still return `anyhow::Result` and downcast where the kind matters.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed version, range or requirement text. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    #[error("invalid version range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },

    #[error("invalid requirement '{input}': {reason}")]
    InvalidRequirement { input: String, reason: String },
}

/// Who asked for a package during resolution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Requirer {
    /// One of the top-level requests.
    Request { requirement: String },
    /// A chosen package variant's own dependency.
    Package {
        name: String,
        version: String,
        requirement: String,
    },
}

impl Requirer {
    /// Package name of the requirer, `None` for top-level requests.
    pub fn package_name(&self) -> Option<&str> {
        match self {
            Requirer::Request { .. } => None,
            Requirer::Package { name, .. } => Some(name),
        }
    }

    pub fn requirement(&self) -> &str {
        match self {
            Requirer::Request { requirement } | Requirer::Package { requirement, .. } => {
                requirement
            }
        }
    }
}

impl fmt::Display for Requirer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirer::Request { requirement } => write!(f, "request '{}'", requirement),
            Requirer::Package {
                name,
                version,
                requirement,
            } => {
                if version.is_empty() {
                    write!(f, "{} requires '{}'", name, requirement)
                } else {
                    write!(f, "{}-{} requires '{}'", name, version, requirement)
                }
            }
        }
    }
}

fn join_requirers(requirers: &[Requirer]) -> String {
    requirers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolution failures. Conflicts are never relaxed into a different pick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("package not found: '{requirement}' (needed by {requested_by})")]
    NotFound {
        package: String,
        requirement: String,
        requested_by: Requirer,
    },

    #[error("conflicting requirements for '{package}': {}", join_requirers(.requirers))]
    Conflict {
        package: String,
        requirers: Vec<Requirer>,
    },

    #[error("resolution of '{package}' did not settle after {attempts} re-picks")]
    Unstable { package: String, attempts: usize },
}

impl ResolutionError {
    /// Short kind name used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::NotFound { .. } => "not_found",
            ResolutionError::Conflict { .. } => "conflict",
            ResolutionError::Unstable { .. } => "unstable",
        }
    }
}

/// Context storage failures seen when loading a saved context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context {id} is missing from {}", .path.display())]
    Missing { id: String, path: PathBuf },

    #[error("context {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("no context is named '{name}'")]
    UnknownName { name: String },
}

/// Invalid wrapper declarations, rejected at generation time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WrapperError {
    #[error("invalid wrapper '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("wrapper '{name}' is declared more than once")]
    DuplicateName { name: String },

    #[error("refusing to overwrite {}: not a pinenv wrapper", .path.display())]
    ForeignFile { path: PathBuf },
}

/// Release tag query failures. Each maps to a fixed process exit code.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("{0}")]
    Failed(String),

    #[error("No existing tags")]
    NoTags,

    #[error("unsupported release mode: {0}")]
    UnsupportedMode(String),

    #[error("malformed version in tag '{tag}': {source}")]
    MalformedTag {
        tag: String,
        #[source]
        source: VersionError,
    },
}

impl ReleaseError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReleaseError::Failed(_) | ReleaseError::NoTags => 1,
            ReleaseError::UnsupportedMode(_) => 2,
            ReleaseError::MalformedTag { .. } => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_every_requirer() {
        let err = ResolutionError::Conflict {
            package: "C".into(),
            requirers: vec![
                Requirer::Package {
                    name: "A".into(),
                    version: "1.0".into(),
                    requirement: "C>=1.0".into(),
                },
                Requirer::Package {
                    name: "B".into(),
                    version: "".into(),
                    requirement: "C<1.0".into(),
                },
            ],
        };

        let msg = err.to_string();
        assert!(msg.contains("A-1.0 requires 'C>=1.0'"));
        assert!(msg.contains("B requires 'C<1.0'"));
        assert_eq!(err.kind(), "conflict");
    }

    #[test]
    fn test_release_exit_codes() {
        assert_eq!(ReleaseError::Failed("boom".into()).exit_code(), 1);
        assert_eq!(ReleaseError::NoTags.exit_code(), 1);
        assert_eq!(ReleaseError::UnsupportedMode("svn".into()).exit_code(), 2);
        let malformed = ReleaseError::MalformedTag {
            tag: "1..2".into(),
            source: VersionError::InvalidVersion {
                input: "1..2".into(),
                reason: "empty token".into(),
            },
        };
        assert_eq!(malformed.exit_code(), 4);
    }

    #[test]
    fn test_requirer_package_name() {
        let req = Requirer::Request {
            requirement: "foo".into(),
        };
        assert_eq!(req.package_name(), None);
        assert_eq!(req.requirement(), "foo");
        assert_eq!(req.to_string(), "request 'foo'");
    }
}
