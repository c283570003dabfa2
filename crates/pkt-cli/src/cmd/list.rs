//! List command
use anyhow::{Context, Result};
use comfy_table::{Table, presets::NOTHING};

use pkt_core::Config;
use pkt_core::registry::InstalledRegistry;

/// List all installed packages
pub fn list() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let registry = InstalledRegistry::open_at(&config.installed_db_path())
        .context("Failed to open installed registry")?;
    let packages = registry.list()?;

    if packages.is_empty() {
        println!();
        println!("  No packages installed.");
        println!("  Run 'pkt sync && pkt install <package>' to get started.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_header(vec!["name", "id", "serial", "installed", "directory"]);
    for pkg in &packages {
        let date = chrono::DateTime::from_timestamp(pkg.installed_at, 0)
            .unwrap_or_default()
            .format("%Y-%m-%d")
            .to_string();
        table.add_row(vec![
            pkg.alias.to_string(),
            pkg.id.to_string(),
            pkg.serial.to_string(),
            date,
            pkg.install_dir.display().to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
