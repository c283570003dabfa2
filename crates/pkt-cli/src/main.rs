//! pkt CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pkt_cli::cmd;
use pkt_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Install {
            packages,
            reinstall,
        } => cmd::install::install(&packages, reinstall, quiet).await,
        Commands::Remove { packages } => cmd::remove::remove(&packages, quiet).await,
        Commands::Upgrade { packages } => cmd::upgrade::upgrade(&packages, quiet).await,
        Commands::Sync => cmd::sync::sync(quiet).await,
        Commands::List => cmd::list::list(),
        Commands::Flags { package, kind } => cmd::flags::flags(&package, kind.as_deref()),
        Commands::Pack { dir, output } => cmd::pack::pack(&dir, &output),
    }
}
