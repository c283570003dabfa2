//! Subcommand implementations.

pub mod flags;
pub mod install;
pub mod list;
pub mod pack;
pub mod remove;
pub mod sync;
pub mod upgrade;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use pkt_core::{Config, Context};

use crate::ui::ConsoleReporter;

/// Load configuration and open every store.
pub(crate) fn open_context(quiet: bool) -> Result<Context> {
    let config = Config::load().context("Failed to load configuration")?;
    Context::open(config, Arc::new(ConsoleReporter::new(quiet)))
        .context("Failed to open package state")
}
