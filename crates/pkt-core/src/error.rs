//! Error taxonomy surfaced by package operations.

use std::path::PathBuf;

use thiserror::Error;

use pkt_schema::PackageName;

use crate::config::ConfigError;
use crate::extract::ExtractError;
use crate::fetch::{FetchError, IntegrityError};
use crate::index::IndexError;
use crate::manifest::ManifestError;
use crate::registry::RegistryError;
use crate::resolver::{ResolveError, join_names};
use crate::sandbox::{PrivilegeError, SandboxError};

/// Errors returned by install, remove, sync and upgrade.
#[derive(Error, Debug)]
pub enum PktError {
    /// A manifest failed to parse or validate.
    #[error("Invalid manifest: {0}")]
    ManifestParse(#[from] ManifestError),

    /// No indexed package satisfies a declaration.
    #[error("Unresolved dependency: no {name} satisfies '{constraint}'")]
    UnresolvedDependency {
        /// Dependency name.
        name: PackageName,
        /// Version constraint as written.
        constraint: String,
    },

    /// A planned package conflicts with these packages.
    #[error("Conflict detected with installed or planned packages: {}", join_names(.0))]
    ConflictDetected(Vec<PackageName>),

    /// An artifact failed checksum or signature verification.
    #[error("Integrity check failed for {filename}: {source}")]
    Integrity {
        /// Artifact file name.
        filename: String,
        /// What failed.
        source: IntegrityError,
    },

    /// An archive entry would land outside the extraction directory.
    #[error("Archive entry escapes the destination: {}", .0.display())]
    PathTraversal(PathBuf),

    /// A hook touched a path outside its allowed roots.
    #[error("Sandbox violation at {}: {reason}", path.display())]
    SandboxViolation {
        /// Offending path.
        path: PathBuf,
        /// Why the path was refused.
        reason: String,
    },

    /// Switching credentials failed.
    #[error("Privilege error: {0}")]
    Privilege(#[from] PrivilegeError),

    /// Installed registry failure.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// No source could deliver an artifact.
    #[error("Network error: {0}")]
    Network(String),

    /// Package index failure.
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// An artifact could not be unpacked or packed.
    #[error("Archive error: {0}")]
    Archive(ExtractError),

    /// A hook script failed.
    #[error("Hook failed: {0}")]
    Hook(SandboxError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The package has no registry entry.
    #[error("{0} is not installed")]
    NotInstalled(PackageName),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Free-form error with a static context label.
    #[error("{context}: {message}")]
    Context {
        /// Label, e.g. the operation that failed.
        context: &'static str,
        /// Error message.
        message: String,
    },
}

impl PktError {
    /// Create an error with context for better debugging.
    pub fn context(ctx: &'static str, msg: impl std::fmt::Display) -> Self {
        Self::Context {
            context: ctx,
            message: msg.to_string(),
        }
    }
}

impl From<ResolveError> for PktError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unresolved { name, constraint } => {
                Self::UnresolvedDependency { name, constraint }
            }
            ResolveError::Conflict(names) => Self::ConflictDetected(names),
            ResolveError::UnknownPackage(id) => Self::context("Unknown package", id),
            ResolveError::Index(e) => Self::Index(e),
            ResolveError::Registry(e) => Self::Registry(e),
        }
    }
}

impl From<ExtractError> for PktError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::PathTraversal(path) => Self::PathTraversal(path),
            other => Self::Archive(other),
        }
    }
}

impl From<SandboxError> for PktError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::Violation { path, reason } => Self::SandboxViolation { path, reason },
            other => Self::Hook(other),
        }
    }
}

impl From<FetchError> for PktError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Integrity { filename, source } => Self::Integrity { filename, source },
            FetchError::Io(e) => Self::Io(e),
            other => Self::Network(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_mapping() {
        let err: PktError = ExtractError::PathTraversal(PathBuf::from("../x")).into();
        assert!(matches!(err, PktError::PathTraversal(_)));

        let err: PktError = SandboxError::Violation {
            path: PathBuf::from("/etc"),
            reason: "system configuration".into(),
        }
        .into();
        assert!(matches!(err, PktError::SandboxViolation { .. }));

        let err: PktError = ResolveError::Conflict(vec![PackageName::new("a")]).into();
        assert_eq!(
            err.to_string(),
            "Conflict detected with installed or planned packages: a"
        );

        let err: PktError = FetchError::Unavailable {
            filename: "a-1.pkt".into(),
            attempts: vec![],
        }
        .into();
        assert!(matches!(err, PktError::Network(_)));
    }
}
