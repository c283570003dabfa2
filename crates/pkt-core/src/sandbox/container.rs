//! Reusable build roots keyed by a package's build-dependency set.

use std::path::{Path, PathBuf};

use pkt_schema::DependencySpec;

use crate::registry::{InstalledRegistry, RegistryError};

/// Stable key for a build-dependency set: blake3 over the sorted,
/// deduplicated declarations.
pub fn container_key(build_deps: &[DependencySpec]) -> String {
    let mut specs: Vec<String> = build_deps.iter().map(ToString::to_string).collect();
    specs.sort();
    specs.dedup();

    let mut hasher = blake3::Hasher::new();
    for spec in &specs {
        hasher.update(spec.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex()[..16].to_string()
}

/// Shared root holding the build dependencies of one dependency set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContainer {
    /// Digest of the sorted dependency set.
    pub key: String,
    /// Container directory.
    pub root: PathBuf,
    /// Builds that have used it.
    pub uses: u64,
}

/// Look up or register the container for `build_deps` under
/// `containers_dir`, creating its directory on first use. Packages
/// without build dependencies get none.
///
/// # Errors
///
/// Returns [`RegistryError`] if the counter cannot be updated or the
/// directory cannot be created.
pub fn acquire(
    registry: &InstalledRegistry,
    containers_dir: &Path,
    build_deps: &[DependencySpec],
) -> Result<Option<BuildContainer>, RegistryError> {
    if build_deps.is_empty() {
        return Ok(None);
    }
    let key = container_key(build_deps);
    let (root, uses) = registry.acquire_container(&key, &containers_dir.join(&key))?;
    std::fs::create_dir_all(&root)?;
    if uses == 1 {
        tracing::info!(%key, root = %root.display(), "created build container");
    } else {
        tracing::debug!(%key, uses, "reusing build container");
    }
    Ok(Some(BuildContainer { key, root, uses }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn specs(raw: &[&str]) -> Vec<DependencySpec> {
        raw.iter().map(|s| DependencySpec::parse(s)).collect()
    }

    #[test]
    fn test_key_ignores_order_and_duplicates() {
        let a = container_key(&specs(&["cc", ">=make@4"]));
        let b = container_key(&specs(&[">=make@4", "cc", "cc"]));
        assert_eq!(a, b);
        assert_ne!(a, container_key(&specs(&["cc"])));
    }

    #[test]
    fn test_acquire_reuses() {
        let tmp = tempdir().unwrap();
        let registry = InstalledRegistry::open_in_memory().unwrap();
        let deps = specs(&["cc"]);

        let first = acquire(&registry, tmp.path(), &deps).unwrap().unwrap();
        assert!(first.root.is_dir());
        assert_eq!(first.uses, 1);

        let second = acquire(&registry, tmp.path(), &deps).unwrap().unwrap();
        assert_eq!(second.root, first.root);
        assert_eq!(second.uses, 2);

        assert!(acquire(&registry, tmp.path(), &[]).unwrap().is_none());
    }
}
