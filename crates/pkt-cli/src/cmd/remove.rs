//! Remove command
use std::time::Instant;

use anyhow::{Result, bail};

use pkt_schema::PackageName;

/// Remove one or more packages. Keeps going after a failure so one broken
/// hook does not block the rest.
pub async fn remove(packages: &[String], quiet: bool) -> Result<()> {
    let ctx = super::open_context(quiet)?;
    let started = Instant::now();

    ctx.reporter.section("Removing");
    let mut removed = 0;
    let mut failed = Vec::new();
    for name in packages {
        let name = PackageName::new(name);
        match pkt_core::remove(&ctx, &name).await {
            Ok(_) => removed += 1,
            Err(e) => {
                ctx.reporter.failed(&name, "", &e.to_string());
                failed.push(name);
            }
        }
    }

    if removed > 0 {
        ctx.reporter
            .summary(removed, "removed", started.elapsed().as_secs_f64());
    }
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(PackageName::as_str).collect();
        bail!("failed to remove: {}", names.join(", "));
    }
    Ok(())
}
