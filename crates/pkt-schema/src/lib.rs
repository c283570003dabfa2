//! Shared types and wire formats for pkt.
//!
//! Everything in this crate is pure data: names, identifiers, version
//! constraints, index records and the LAN discovery datagrams. No I/O.

pub mod arch;
pub mod discovery;
pub mod hash;
pub mod record;
pub mod types;
pub mod version;

// Re-exports
pub use arch::*;
pub use discovery::{DISCOVERY_PORT, DiscoveryMessage};
pub use hash::*;
pub use record::{
    DependencyEdge, DependencyKind, DependencyLists, PackageRecord, SourcePackage,
    artifact_filename,
};
pub use types::*;
pub use version::{ConstraintOp, DependencySpec, VersionConstraint, VersionTriple, satisfies};

/// Magic bytes for ZSTD compression (Little Endian: 0xFD2FB528 -> 28 B5 2F FD)
pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Root of Trust: Ed25519 public key for the default registry (Base64).
/// Verifies both sync documents and artifacts served from trusted sources.
pub const PKT_PUBLIC_KEY: &str = "qde+O8DuK+yt22p9VXayvh5dquVzsKo1CiathkDxFT8=";

/// File extension of package artifacts (zstd-compressed tar).
pub const ARTIFACT_EXTENSION: &str = "pkt";

/// Name of the descriptor at the root of every artifact.
pub const MANIFEST_FILE: &str = "manifest.toml";

/// Default name of the Lua hook script at the root of every artifact.
pub const HOOK_SCRIPT: &str = "package.lua";
