//! pkt - a package manager for signed, sandboxed artifacts
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! # Directory Layout
//!
//! ```text
//! $PKT_HOME (/var/lib/pkt)
//! ├── config.toml   # Optional configuration
//! ├── index.db      # Synced package index
//! ├── installed.db  # Installed packages, files and flags
//! ├── tmp/          # Per-install scratch directories
//! └── containers/   # Shared build-dependency containers
//! ```

pub mod cmd;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "pkt")]
#[command(author, version, about = "pkt - resolve, fetch and install signed packages")]
#[command(long_about = None)]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install packages from the index or local .pkt artifacts
    Install {
        /// Package declarations (foo, foo@1.2.3, >=foo@1.2) or artifact paths
        #[arg(required = true)]
        packages: Vec<String>,
        /// Install even if an equivalent revision is already present
        #[arg(long)]
        reinstall: bool,
    },
    /// Remove installed packages
    Remove {
        /// Package name(s)
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Upgrade installed packages to the newest serial their source serves
    Upgrade {
        /// Package name(s); all installed packages when omitted
        packages: Vec<String>,
    },
    /// Refresh the package index from the configured sources
    Sync,
    /// List installed packages
    List,
    /// Show files a package points at (configs, binaries, ...)
    Flags {
        /// Package name
        package: String,
        /// Only show flags of this kind
        kind: Option<String>,
    },
    /// Pack a package directory into an artifact
    Pack {
        /// Directory holding manifest.toml and the hook script
        dir: PathBuf,
        /// Output artifact path
        #[arg(short, long)]
        output: PathBuf,
    },
}
