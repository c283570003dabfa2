//! Flags command
use anyhow::{Context, Result, bail};
use comfy_table::{Table, presets::NOTHING};

use pkt_core::Config;
use pkt_core::paths::expand_placeholders;
use pkt_core::registry::InstalledRegistry;
use pkt_schema::PackageName;

/// Show the files a package points at, optionally of one kind
pub fn flags(package: &str, kind: Option<&str>) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let registry = InstalledRegistry::open_at(&config.installed_db_path())
        .context("Failed to open installed registry")?;

    let Some(installed) = registry.get(&PackageName::new(package))? else {
        bail!("{package} is not installed");
    };
    let flags = registry.flags(&installed.id, kind)?;

    if flags.is_empty() {
        println!("  {package} has no flags.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(NOTHING).set_header(vec!["kind", "name", "path"]);
    for flag in flags {
        table.add_row(vec![flag.kind, flag.name, expand_placeholders(&flag.path)]);
    }
    println!("{table}");
    Ok(())
}
