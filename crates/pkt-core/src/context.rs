//! Shared operation context.
//!
//! Groups the stores and services every operation needs so they can be
//! cloned into concurrent install tasks.

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::PktError;
use crate::fetch::Fetcher;
use crate::index::PackageIndex;
use crate::registry::InstalledRegistry;
use crate::reporter::Reporter;
use crate::sandbox::PrivilegeBracket;

/// Everything an operation needs. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    /// Loaded configuration.
    pub config: Arc<Config>,
    /// Synced package index.
    pub index: Arc<PackageIndex>,
    /// Installed packages.
    pub registry: Arc<InstalledRegistry>,
    /// Artifact downloader.
    pub fetcher: Arc<Fetcher>,
    /// Credential switching for hooks and extraction.
    pub privileges: Arc<PrivilegeBracket>,
    /// Progress output.
    pub reporter: Arc<dyn Reporter>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("home", &self.config.home)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Open the on-disk stores described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PktError`] if a store cannot be opened, the HTTP client
    /// cannot be built, or the unprivileged account is missing.
    pub fn open(config: Config, reporter: Arc<dyn Reporter>) -> Result<Self, PktError> {
        let index = PackageIndex::open_at(&config.index_db_path())?;
        let registry = InstalledRegistry::open_at(&config.installed_db_path())?;
        let fetcher = Fetcher::from_config(&config)?;
        let privileges = PrivilegeBracket::for_user(&config.unprivileged_user)?;
        Ok(Self::new(
            config, index, registry, fetcher, privileges, reporter,
        ))
    }

    /// Assemble a context from already opened parts.
    pub fn new(
        config: Config,
        index: PackageIndex,
        registry: InstalledRegistry,
        fetcher: Fetcher,
        privileges: PrivilegeBracket,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            index: Arc::new(index),
            registry: Arc::new(registry),
            fetcher: Arc::new(fetcher),
            privileges: Arc::new(privileges),
            reporter,
        }
    }
}
