//! Dependency resolution.
//!
//! Each of the root's edge kinds is walked on its own, depth-first and
//! post-order: a candidate's own dependencies are resolved before the
//! candidate is placed in the plan. Heights recorded on the way let the
//! installer run the plan in waves, leaves first.
//!
//! Below the root, a dependency has to be built before it can be
//! installed, so the runtime and build walks follow both the runtime and
//! the build edges of every candidate they place. The conflict walk only
//! follows conflict edges.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;
use tracing::{debug, trace};

use pkt_schema::{
    DependencyEdge, DependencyKind, DependencySpec, Location, PackageId, PackageName,
    PackageRecord, VersionConstraint,
};

use crate::index::{IndexError, PackageIndex};
use crate::registry::{InstalledRegistry, RegistryError};

/// Why a request could not be turned into a plan.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// A runtime or build edge has no satisfying candidate.
    #[error("No candidate for {name} satisfies '{constraint}'")]
    Unresolved {
        /// Dependency name.
        name: PackageName,
        /// Constraint as declared.
        constraint: String,
    },

    /// Conflict edges resolved to these packages.
    #[error("Conflicting packages: {}", join_names(.0))]
    Conflict(Vec<PackageName>),

    /// The root is not in the index at the requested location.
    #[error("Unknown package: {0}")]
    UnknownPackage(PackageId),

    /// Index lookup failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub(crate) fn join_names(names: &[PackageName]) -> String {
    names
        .iter()
        .map(PackageName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One chosen candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// Chosen revision.
    pub id: PackageId,
    /// Package name.
    pub name: PackageName,
    /// Version string as indexed.
    pub version: String,
    /// Revision counter at `location`.
    pub serial: u64,
    /// Where the revision is served from; the index row is looked up by
    /// `id` and this together.
    pub location: Location,
    /// 0 for leaves, otherwise one more than the tallest dependency.
    pub height: usize,
}

impl PlanEntry {
    fn from_record(record: &PackageRecord, height: usize) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            version: record.version.clone(),
            serial: record.serial,
            location: record.location.clone(),
            height,
        }
    }
}

/// What a request resolves to, keyed by the root edge kind each entry was
/// reached through. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedPlan {
    /// Reached from the root's runtime edges, including whatever those
    /// dependencies need to build.
    pub runtime: BTreeMap<PackageName, PlanEntry>,
    /// Reached from the root's build edges, including the build tools'
    /// own runtime closure.
    pub build: BTreeMap<PackageName, PlanEntry>,
    /// Packages the root's conflict edges resolved to.
    pub conflicts: BTreeMap<PackageName, PlanEntry>,
}

impl ResolvedPlan {
    /// Entries of one kind.
    pub fn of_kind(&self, kind: DependencyKind) -> &BTreeMap<PackageName, PlanEntry> {
        match kind {
            DependencyKind::Runtime => &self.runtime,
            DependencyKind::Build => &self.build,
            DependencyKind::Conflict => &self.conflicts,
        }
    }

    fn of_kind_mut(&mut self, kind: DependencyKind) -> &mut BTreeMap<PackageName, PlanEntry> {
        match kind {
            DependencyKind::Runtime => &mut self.runtime,
            DependencyKind::Build => &mut self.build,
            DependencyKind::Conflict => &mut self.conflicts,
        }
    }

    /// Whether nothing needs installing.
    pub fn is_empty(&self) -> bool {
        self.runtime.is_empty() && self.build.is_empty()
    }

    /// Runtime and build entries grouped by height, lowest first.
    ///
    /// Every entry of a wave depends only on entries of earlier waves, so a
    /// wave can be installed concurrently. A name present in both maps is
    /// installed once, as its runtime choice.
    pub fn install_waves(&self) -> Vec<Vec<PlanEntry>> {
        let mut merged: BTreeMap<&PackageName, &PlanEntry> = self.build.iter().collect();
        merged.extend(self.runtime.iter());

        let mut waves: BTreeMap<usize, Vec<PlanEntry>> = BTreeMap::new();
        for entry in merged.into_values() {
            waves.entry(entry.height).or_default().push(entry.clone());
        }
        waves.into_values().collect()
    }
}

/// Resolves requests against the index and the installed registry.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    index: &'a PackageIndex,
    registry: &'a InstalledRegistry,
}

impl<'a> Resolver<'a> {
    /// Resolver over `index`, skipping what `registry` already has.
    pub fn new(index: &'a PackageIndex, registry: &'a InstalledRegistry) -> Self {
        Self { index, registry }
    }

    /// Resolve the dependency graph below the indexed package `root` as
    /// served by `favorite`.
    ///
    /// `favorite` is the root's own location; candidates from it win ties
    /// against already-chosen entries.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::UnknownPackage`] if `root` is not indexed at
    /// `favorite`,
    /// [`ResolveError::Unresolved`] if a runtime or build edge has no
    /// satisfying candidate, and [`ResolveError::Conflict`] if any
    /// conflict edge resolves.
    pub fn resolve(
        &self,
        root: &PackageId,
        favorite: &Location,
    ) -> Result<ResolvedPlan, ResolveError> {
        let record = self
            .index
            .get(root, favorite)?
            .ok_or_else(|| ResolveError::UnknownPackage(root.clone()))?;

        let mut edges = Vec::new();
        for kind in DependencyKind::ALL {
            edges.extend(self.index.edges(root, favorite, kind)?);
        }
        self.resolve_declared(&record.name, root, &edges, favorite)
    }

    /// Resolve a root whose edges are known directly (e.g. a local artifact's
    /// manifest) rather than looked up in the index.
    ///
    /// # Errors
    ///
    /// Same as [`Resolver::resolve`], minus `UnknownPackage`.
    pub fn resolve_declared(
        &self,
        root_name: &PackageName,
        root: &PackageId,
        edges: &[DependencyEdge],
        favorite: &Location,
    ) -> Result<ResolvedPlan, ResolveError> {
        let mut plan = ResolvedPlan::default();

        for kind in DependencyKind::ALL {
            let root_edges: Vec<DependencyEdge> =
                edges.iter().filter(|e| e.kind == kind).cloned().collect();

            let mut walk = Walk {
                resolver: *self,
                kind,
                favorite,
                root_name,
                visiting: HashSet::from([(root.clone(), favorite.clone())]),
                heights: HashMap::new(),
                entries: BTreeMap::new(),
            };
            walk.visit_edges(&root_edges)?;
            *plan.of_kind_mut(kind) = walk.entries;
        }

        if !plan.conflicts.is_empty() {
            let names: Vec<PackageName> = plan.conflicts.keys().cloned().collect();
            return Err(ResolveError::Conflict(names));
        }

        debug!(
            root = %root,
            runtime = plan.runtime.len(),
            build = plan.build.len(),
            "resolved plan"
        );
        Ok(plan)
    }

    /// Best indexed candidate for a requested package.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Unresolved`] if nothing satisfies `spec`.
    pub fn pick(
        &self,
        spec: &DependencySpec,
        favorite: &Location,
    ) -> Result<PackageRecord, ResolveError> {
        self.select(&spec.name, &spec.constraint, favorite)?
            .ok_or_else(|| ResolveError::Unresolved {
                name: spec.name.clone(),
                constraint: spec.constraint.to_string(),
            })
    }

    /// Whether installing `candidate` would be redundant: the same
    /// location already has an equal or newer serial, or the exact
    /// version is installed from anywhere.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Registry`] on database failure.
    pub fn already_installed(&self, candidate: &PackageRecord) -> Result<bool, ResolveError> {
        let Some(installed) = self.registry.get(&candidate.alias)? else {
            return Ok(false);
        };
        let newer_here =
            installed.location == candidate.location && installed.serial >= candidate.serial;
        Ok(newer_here || installed.version == candidate.version)
    }

    /// Highest-ranked candidate satisfying `constraint`, if any.
    ///
    /// Ranked by version triple descending; equal triples prefer
    /// `favorite`, then the lexicographically smaller location.
    fn select(
        &self,
        name: &PackageName,
        constraint: &VersionConstraint,
        favorite: &Location,
    ) -> Result<Option<PackageRecord>, ResolveError> {
        let mut candidates: Vec<PackageRecord> = self
            .index
            .candidates(name)?
            .into_iter()
            .filter(|c| constraint.matches(c.triple()))
            .collect();

        candidates.sort_by(|a, b| {
            b.triple()
                .cmp(&a.triple())
                .then_with(|| (&b.location == favorite).cmp(&(&a.location == favorite)))
                .then_with(|| a.location.cmp(&b.location))
                .then_with(|| b.serial.cmp(&a.serial))
        });
        Ok(candidates.into_iter().next())
    }
}

/// An index row: the same revision may be served by several locations.
type RowKey = (PackageId, Location);

/// State of one per-kind traversal.
struct Walk<'w> {
    resolver: Resolver<'w>,
    kind: DependencyKind,
    favorite: &'w Location,
    root_name: &'w PackageName,
    visiting: HashSet<RowKey>,
    heights: HashMap<RowKey, usize>,
    entries: BTreeMap<PackageName, PlanEntry>,
}

impl Walk<'_> {
    /// Visit every edge; returns the height of their common parent.
    fn visit_edges(&mut self, edges: &[DependencyEdge]) -> Result<usize, ResolveError> {
        let mut height = 0;
        for edge in edges {
            if let Some(child) = self.visit(edge)? {
                height = height.max(child + 1);
            }
        }
        Ok(height)
    }

    fn visit(&mut self, edge: &DependencyEdge) -> Result<Option<usize>, ResolveError> {
        let Some(candidate) = self
            .resolver
            .select(&edge.name, &edge.constraint, self.favorite)?
        else {
            if self.kind == DependencyKind::Conflict {
                // Nothing known by that name, nothing to conflict with.
                return Ok(None);
            }
            return Err(ResolveError::Unresolved {
                name: edge.name.clone(),
                constraint: edge.constraint.to_string(),
            });
        };

        if &candidate.name == self.root_name {
            return Ok(None);
        }
        if self.kind != DependencyKind::Conflict && self.resolver.already_installed(&candidate)? {
            debug!(id = %candidate.id, "already installed, skipping");
            return Ok(None);
        }

        let key = (candidate.id.clone(), candidate.location.clone());
        let height = if let Some(height) = self.heights.get(&key) {
            *height
        } else if self.visiting.insert(key.clone()) {
            let child_edges = self.child_edges(&candidate)?;
            let height = self.visit_edges(&child_edges)?;
            self.visiting.remove(&key);
            self.heights.insert(key, height);
            height
        } else {
            trace!(id = %candidate.id, "dependency cycle broken");
            0
        };

        self.place(&candidate, height);
        Ok(Some(height))
    }

    /// Edges to follow below `candidate`.
    fn child_edges(&self, candidate: &PackageRecord) -> Result<Vec<DependencyEdge>, ResolveError> {
        let index = self.resolver.index;
        let (id, location) = (&candidate.id, &candidate.location);
        if self.kind == DependencyKind::Conflict {
            return Ok(index.edges(id, location, DependencyKind::Conflict)?);
        }
        let mut edges = index.edges(id, location, DependencyKind::Runtime)?;
        edges.extend(index.edges(id, location, DependencyKind::Build)?);
        Ok(edges)
    }

    fn place(&mut self, candidate: &PackageRecord, height: usize) {
        let replace = match self.entries.get(&candidate.name) {
            None => true,
            Some(existing) => {
                candidate.location == *self.favorite
                    || (candidate.location == existing.location
                        && candidate.serial > existing.serial)
            }
        };
        if replace {
            let height = self
                .entries
                .get(&candidate.name)
                .map_or(height, |existing| existing.height.max(height));
            self.entries.insert(
                candidate.name.clone(),
                PlanEntry::from_record(candidate, height),
            );
        }
    }
}
