//! Upgrade command
use anyhow::{Result, bail};

use pkt_schema::PackageName;

/// Upgrade the named packages, or everything installed when none are given.
pub async fn upgrade(packages: &[String], quiet: bool) -> Result<()> {
    let ctx = super::open_context(quiet)?;
    let names: Vec<PackageName> = packages.iter().map(|p| PackageName::new(p)).collect();

    ctx.reporter.section("Upgrading");
    let report = pkt_core::upgrade(&ctx, &names).await?;

    if report.installed.is_empty() && report.is_success() {
        ctx.reporter.info("Everything is up to date");
    }
    if !report.is_success() {
        let names: Vec<&str> = report.failed.iter().map(|(name, _)| name.as_str()).collect();
        bail!("failed to upgrade: {}", names.join(", "));
    }
    Ok(())
}
