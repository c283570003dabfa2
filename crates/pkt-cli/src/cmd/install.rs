//! Install command
use anyhow::{Result, bail};

use pkt_core::{InstallOptions, InstallTarget};

/// Install packages by declaration or from local artifacts
pub async fn install(packages: &[String], reinstall: bool, quiet: bool) -> Result<()> {
    let ctx = super::open_context(quiet)?;
    let targets: Vec<InstallTarget> = packages.iter().map(|p| InstallTarget::parse(p)).collect();

    let report = pkt_core::install(&ctx, &targets, InstallOptions { reinstall }).await?;

    if !report.is_success() {
        let names: Vec<&str> = report.failed.iter().map(|(name, _)| name.as_str()).collect();
        bail!("failed to install: {}", names.join(", "));
    }
    Ok(())
}
