//! Upgrades of installed packages.
//!
//! A package is upgraded to the highest serial its own location serves.
//! The new revision goes through the normal install pipeline on top of the
//! existing install directory; once it is recorded, files the previous
//! revision created and the new one did not are deleted.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info};

use pkt_schema::{PackageName, PackageRecord};

use crate::context::Context;
use crate::error::PktError;
use crate::index::{IndexError, PackageIndex};
use crate::install::{InstallReport, install_indexed};
use crate::registry::{InstalledPackage, PackageFile};
use crate::remove::delete_files;

/// Newest revision of `installed` served by the location it came from, if
/// that is a higher serial than the installed one.
///
/// Packages installed from a local artifact have no location to ask and
/// never have an upgrade.
///
/// # Errors
///
/// Returns [`IndexError`] on database failure.
pub fn newest_revision(
    index: &PackageIndex,
    installed: &InstalledPackage,
) -> Result<Option<PackageRecord>, IndexError> {
    if installed.location.is_local() {
        return Ok(None);
    }
    let newest = index
        .candidates(&installed.alias)?
        .into_iter()
        .filter(|c| c.location == installed.location && c.serial > installed.serial)
        .max_by(|a, b| a.serial.cmp(&b.serial).then_with(|| a.triple().cmp(&b.triple())));
    Ok(newest)
}

/// Upgrade `names`, or every installed package when `names` is empty.
///
/// Packages without a newer revision land in
/// [`InstallReport::already_installed`]; unknown names and failed installs
/// in [`InstallReport::failed`].
///
/// # Errors
///
/// Only errors that prevent processing entirely are returned.
pub async fn upgrade(ctx: &Context, names: &[PackageName]) -> Result<InstallReport, PktError> {
    let started = Instant::now();
    let mut report = InstallReport::default();

    let aliases: Vec<PackageName> = if names.is_empty() {
        ctx.registry
            .list()?
            .into_iter()
            .map(|p| p.alias)
            .collect()
    } else {
        names.to_vec()
    };

    for alias in aliases {
        // Re-read each time: an earlier upgrade may have pulled this one in
        // as a dependency.
        let Some(installed) = ctx.registry.get(&alias)? else {
            let e = PktError::NotInstalled(alias.clone());
            ctx.reporter.failed(&alias, "", &e.to_string());
            report.failed.push((alias, e.to_string()));
            continue;
        };
        let Some(candidate) = newest_revision(&ctx.index, &installed)? else {
            debug!(id = %installed.id, "up to date");
            report.already_installed.push(installed.id);
            continue;
        };

        ctx.reporter.info(&format!(
            "{} {} -> {} (serial {} -> {})",
            installed.alias,
            installed.version,
            candidate.version,
            installed.serial,
            candidate.serial
        ));
        if let Err(e) = upgrade_one(ctx, &installed, candidate, &mut report).await {
            ctx.reporter
                .failed(&installed.alias, &installed.version, &e.to_string());
            report.failed.push((installed.alias, e.to_string()));
        }
    }

    if !report.installed.is_empty() {
        ctx.reporter.summary(
            report.installed.len(),
            "upgraded",
            started.elapsed().as_secs_f64(),
        );
    }
    Ok(report)
}

async fn upgrade_one(
    ctx: &Context,
    installed: &InstalledPackage,
    candidate: PackageRecord,
    report: &mut InstallReport,
) -> Result<(), PktError> {
    let old_files = ctx.registry.files(&installed.id)?;
    install_indexed(ctx, candidate, report).await?;

    let current = ctx
        .registry
        .get(&installed.alias)?
        .ok_or_else(|| PktError::NotInstalled(installed.alias.clone()))?;
    let kept: HashSet<PackageFile> = ctx.registry.files(&current.id)?.into_iter().collect();
    let stale: Vec<PackageFile> = old_files.into_iter().filter(|f| !kept.contains(f)).collect();
    if !stale.is_empty() {
        debug!(id = %current.id, count = stale.len(), "deleting files of previous revision");
        ctx.privileges
            .run_privileged(move || delete_files(&stale))
            .await??;
    }

    info!(from = %installed.id, to = %current.id, "upgraded");
    Ok(())
}
