//! Artifact descriptor.
//!
//! Every artifact carries a `manifest.toml` at its root:
//!
//! ```toml
//! [package]
//! name = "ripgrep"
//! version = "14.1.0"
//! serial = 7
//! maintainer = "someone@example.org"
//! description = "Fast grep"
//!
//! [dependencies]
//! runtime = [">=pcre2@10.42"]
//! build = ["rust"]
//! conflicts = []
//!
//! [hooks]
//! script = "package.lua"
//! ```

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pkt_schema::{
    DependencyEdge, DependencyLists, HOOK_SCRIPT, MANIFEST_FILE, PackageId, PackageName,
    PackageRecord, VersionTriple, is_path_component,
};

use crate::extract::{ExtractError, open_decoded};

/// Errors reading a `manifest.toml`.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Not valid TOML or wrong shape.
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// The artifact could not be opened.
    #[error("Archive error: {0}")]
    Archive(#[from] ExtractError),

    /// The artifact has no manifest entry.
    #[error("No {MANIFEST_FILE} in artifact")]
    Missing,

    /// A field has an unusable value.
    #[error("Invalid manifest: {0}")]
    Invalid(String),

    /// The artifact is not the revision that was asked for.
    #[error("Manifest describes {found}, expected {expected}")]
    Mismatch {
        /// Revision the index promised.
        expected: String,
        /// Revision the manifest describes.
        found: String,
    },
}

/// The `[package]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSection {
    /// Package name, also its install directory name.
    pub name: PackageName,
    /// Version string.
    pub version: String,
    /// Revision counter; higher wins for the same version.
    #[serde(default)]
    pub serial: u64,
    /// Contact for the package.
    #[serde(default)]
    pub maintainer: String,
    /// One-line summary.
    #[serde(default)]
    pub description: String,
}

/// The `[hooks]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSection {
    /// Lua script at the artifact root defining the hook functions.
    #[serde(default = "default_script")]
    pub script: String,
}

fn default_script() -> String {
    HOOK_SCRIPT.to_string()
}

impl Default for HookSection {
    fn default() -> Self {
        Self {
            script: default_script(),
        }
    }
}

/// Package manifest shipped at the root of every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Identity.
    pub package: PackageSection,
    /// Declared dependencies by kind.
    #[serde(default)]
    pub dependencies: DependencyLists,
    /// Hook script location.
    #[serde(default)]
    pub hooks: HookSection,
}

impl Manifest {
    /// Parse and validate manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] on malformed TOML, an empty name or
    /// version, or a hook script that is not a plain file name.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let manifest: Self = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read `manifest.toml` from an extracted artifact directory.
    ///
    /// # Errors
    ///
    /// See [`Manifest::parse`]; [`ManifestError::Missing`] if absent.
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ManifestError::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the manifest straight out of a compressed artifact, without
    /// extracting anything else.
    ///
    /// # Errors
    ///
    /// See [`Manifest::load`].
    pub fn from_artifact(path: &Path) -> Result<Self, ManifestError> {
        Self::from_tar(open_decoded(path)?)
    }

    /// Find and parse the manifest in an uncompressed tar stream.
    ///
    /// # Errors
    ///
    /// See [`Manifest::load`].
    pub fn from_tar<R: Read>(reader: R) -> Result<Self, ManifestError> {
        let mut archive = tar::Archive::new(reader);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let is_manifest = {
                let entry_path = entry.path()?;
                let mut components = entry_path
                    .components()
                    .filter(|c| !matches!(c, std::path::Component::CurDir));
                components.next().is_some_and(|c| c.as_os_str() == MANIFEST_FILE)
                    && components.next().is_none()
            };
            if is_manifest && entry.header().entry_type().is_file() {
                let mut text = String::new();
                entry.read_to_string(&mut text)?;
                return Self::parse(&text);
            }
        }
        Err(ManifestError::Missing)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        if self.package.name.is_empty() {
            return Err(ManifestError::Invalid("package.name is empty".into()));
        }
        if !self.package.name.is_valid() {
            return Err(ManifestError::Invalid(format!(
                "package.name '{}' is not a plain file name",
                self.package.name
            )));
        }
        let version = self.package.version.trim();
        if version.is_empty() {
            return Err(ManifestError::Invalid("package.version is empty".into()));
        }
        if !is_path_component(version) {
            return Err(ManifestError::Invalid(format!(
                "package.version '{version}' is not a plain file name"
            )));
        }
        let script = self.hooks.script.as_str();
        if script.is_empty() || script.contains('/') || script == "." || script == ".." {
            return Err(ManifestError::Invalid(format!(
                "hooks.script must be a file at the artifact root, got '{script}'"
            )));
        }
        Ok(())
    }

    /// `name@version`.
    pub fn id(&self) -> PackageId {
        PackageId::new(&self.package.name, &self.package.version)
    }

    /// Declared dependency edges.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies.edges(&self.id())
    }

    /// Check the manifest describes the revision the index promised.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Mismatch`] on a different name or version.
    pub fn check_matches(&self, record: &PackageRecord) -> Result<(), ManifestError> {
        let same_version =
            VersionTriple::parse(&self.package.version) == record.triple();
        if self.package.name != record.name || !same_version {
            return Err(ManifestError::Mismatch {
                expected: record.id.to_string(),
                found: self.id().to_string(),
            });
        }
        Ok(())
    }
}
