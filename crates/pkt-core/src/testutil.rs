//! Fixtures shared by unit tests.

use std::path::PathBuf;

use pkt_schema::{
    DependencyLists, DependencySpec, Location, PackageId, PackageName, PackageRecord, Sha256Hash,
    SourcePackage,
};

use crate::registry::InstalledPackage;

fn specs(raw: &[&str]) -> Vec<DependencySpec> {
    raw.iter().map(|s| DependencySpec::parse(s)).collect()
}

pub(crate) fn source_pkg(
    name: &str,
    version: &str,
    serial: u64,
    runtime: &[&str],
    build: &[&str],
) -> SourcePackage {
    SourcePackage {
        name: PackageName::new(name),
        alias: None,
        version: version.to_string(),
        serial,
        maintainer: "tests@example.org".to_string(),
        verified: true,
        description: String::new(),
        uploaded_at: 0,
        checksum: Sha256Hash::default(),
        signature: String::new(),
        size: 0,
        dependencies: DependencyLists {
            runtime: specs(runtime),
            build: specs(build),
            conflicts: Vec::new(),
        },
    }
}

pub(crate) fn with_conflicts(mut pkg: SourcePackage, conflicts: &[&str]) -> SourcePackage {
    pkg.dependencies.conflicts = specs(conflicts);
    pkg
}

pub(crate) fn installed(
    name: &str,
    version: &str,
    serial: u64,
    location: &str,
) -> InstalledPackage {
    let alias = PackageName::new(name);
    InstalledPackage {
        id: PackageId::new(&alias, version),
        install_dir: PathBuf::from("/opt/pkt").join(name),
        alias,
        version: version.to_string(),
        serial,
        location: Location::from_raw(location),
        in_cache: false,
        script: String::new(),
        installed_at: 0,
    }
}

/// A bare index record at the local location.
pub(crate) fn record_for(name: &str, version: &str) -> PackageRecord {
    let (record, _) = source_pkg(name, version, 1, &[], &[]).into_record(&Location::local());
    record
}
