//! Sync command
use anyhow::{Context, Result};

/// Refresh the package index from every configured source
pub async fn sync(quiet: bool) -> Result<()> {
    let ctx = super::open_context(quiet)?;
    let summaries = pkt_core::sync(&ctx).await.context("Sync failed")?;

    let total: usize = summaries.iter().map(|s| s.packages).sum();
    if !summaries.is_empty() {
        ctx.reporter.info(&format!(
            "{total} packages from {} source{}",
            summaries.len(),
            if summaries.len() == 1 { "" } else { "s" }
        ));
    }
    Ok(())
}
