//! pkt core: resolution, fetching, verification and sandboxed installs.

pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod index;
pub mod install;
pub mod manifest;
pub mod paths;
pub mod registry;
pub mod remove;
pub mod reporter;
pub mod resolver;
pub mod sandbox;
pub mod sync;
pub mod upgrade;

#[cfg(test)]
mod testutil;

pub use config::{Config, FailurePolicy, SourceConfig};
pub use context::Context;
pub use error::PktError;
pub use install::{InstallOptions, InstallReport, InstallTarget, install};
pub use manifest::Manifest;
pub use remove::remove;
pub use reporter::{NullReporter, Reporter};
pub use sync::{SyncSummary, sync};
pub use upgrade::upgrade;

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("pkt-core/", env!("CARGO_PKG_VERSION"));
