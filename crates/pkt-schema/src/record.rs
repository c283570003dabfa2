//! Index records and dependency edges.

use serde::{Deserialize, Serialize};

use crate::hash::Sha256Hash;
use crate::types::{Location, PackageId, PackageName, is_path_component};
use crate::version::{DependencySpec, VersionConstraint, VersionTriple};
use crate::ARTIFACT_EXTENSION;

/// The three kinds of dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// Needed at run time.
    Runtime,
    /// Needed to build the package.
    Build,
    /// Must not be present alongside the package.
    Conflict,
}

impl DependencyKind {
    /// Every kind, in resolution order.
    pub const ALL: [Self; 3] = [Self::Runtime, Self::Build, Self::Conflict];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Build => "build",
            Self::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One declared dependency of one package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    /// Declaring package.
    pub package_id: PackageId,
    /// Target package name.
    pub name: PackageName,
    /// Edge kind.
    pub kind: DependencyKind,
    /// Accepted target versions.
    pub constraint: VersionConstraint,
}

/// A remote package known to the index. Immutable once synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    /// Package name.
    pub name: PackageName,
    /// Name users query by.
    pub alias: PackageName,
    /// `name@version`.
    pub id: PackageId,
    /// Human version string.
    pub version: String,
    /// Revision counter within the family.
    pub serial: u64,
    /// Maintainer contact.
    pub maintainer: String,
    /// Whether the registry vouches for the maintainer.
    pub verified: bool,
    /// One-line description.
    pub description: String,
    /// Upload time, seconds since the epoch.
    pub uploaded_at: i64,
    /// Origin the record was synced from.
    pub location: Location,
    /// SHA256 of the artifact (may be empty for signed artifacts).
    pub checksum: Sha256Hash,
    /// Base64 Ed25519 signature over the artifact (may be empty).
    pub signature: String,
    /// Artifact size in bytes.
    pub size: u64,
}

impl PackageRecord {
    /// Parsed version triple.
    pub fn triple(&self) -> VersionTriple {
        VersionTriple::parse(&self.version)
    }

    /// Artifact filename shared by caches, peers and mirrors.
    pub fn artifact_filename(&self) -> String {
        artifact_filename(&self.name, &self.version)
    }
}

/// `<name>-<version>.pkt`
pub fn artifact_filename(name: &PackageName, version: &str) -> String {
    format!("{name}-{version}.{ARTIFACT_EXTENSION}")
}

/// Dependency declarations grouped by kind, as written in manifests and
/// sync documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencyLists {
    /// Runtime dependencies.
    pub runtime: Vec<DependencySpec>,
    /// Build dependencies.
    pub build: Vec<DependencySpec>,
    /// Conflicting packages.
    pub conflicts: Vec<DependencySpec>,
}

impl DependencyLists {
    /// Declarations of one kind.
    pub fn of_kind(&self, kind: DependencyKind) -> &[DependencySpec] {
        match kind {
            DependencyKind::Runtime => &self.runtime,
            DependencyKind::Build => &self.build,
            DependencyKind::Conflict => &self.conflicts,
        }
    }

    /// Flatten into edges declared by `package_id`.
    ///
    /// Repeated declarations of the same name and kind keep the first one.
    pub fn edges(&self, package_id: &PackageId) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = Vec::new();
        for kind in DependencyKind::ALL {
            for spec in self.of_kind(kind) {
                if spec.name.is_empty()
                    || edges.iter().any(|e| e.kind == kind && e.name == spec.name)
                {
                    continue;
                }
                edges.push(DependencyEdge {
                    package_id: package_id.clone(),
                    name: spec.name.clone(),
                    kind,
                    constraint: spec.constraint,
                });
            }
        }
        edges
    }
}

/// One package entry of a sync document (JSON array of these).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePackage {
    /// Package name.
    pub name: PackageName,
    /// Query alias, defaults to the name.
    #[serde(default)]
    pub alias: Option<PackageName>,
    /// Version string.
    pub version: String,
    /// Revision counter.
    pub serial: u64,
    /// Maintainer contact.
    #[serde(default)]
    pub maintainer: String,
    /// Verified maintainer flag.
    #[serde(default)]
    pub verified: bool,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Upload time, seconds since the epoch.
    #[serde(default)]
    pub uploaded_at: i64,
    /// SHA256 of the artifact.
    #[serde(default)]
    pub checksum: Sha256Hash,
    /// Base64 Ed25519 signature of the artifact.
    #[serde(default)]
    pub signature: String,
    /// Artifact size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Declared dependencies.
    #[serde(default)]
    pub dependencies: DependencyLists,
}

impl SourcePackage {
    /// The first of `name`, `alias` or `version` that cannot be used as a
    /// single path component, if any.
    pub fn unsafe_field(&self) -> Option<&'static str> {
        if !self.name.is_valid() {
            return Some("name");
        }
        if self.alias.as_ref().is_some_and(|alias| !alias.is_valid()) {
            return Some("alias");
        }
        if !is_path_component(self.version.trim()) {
            return Some("version");
        }
        None
    }

    /// Convert into an index record plus its edges, stamped with `location`.
    pub fn into_record(self, location: &Location) -> (PackageRecord, Vec<DependencyEdge>) {
        let id = PackageId::new(&self.name, &self.version);
        let edges = self.dependencies.edges(&id);
        let record = PackageRecord {
            alias: self.alias.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            id,
            version: self.version,
            serial: self.serial,
            maintainer: self.maintainer,
            verified: self.verified,
            description: self.description,
            uploaded_at: self.uploaded_at,
            location: location.clone(),
            checksum: self.checksum,
            signature: self.signature,
            size: self.size,
        };
        (record, edges)
    }
}
