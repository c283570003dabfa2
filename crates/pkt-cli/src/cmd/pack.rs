//! Pack command
use std::path::Path;

use anyhow::{Context, Result, bail};

use pkt_core::Manifest;
use pkt_core::extract::pack_dir_to_file;

/// Pack a package directory into a `.pkt` artifact
pub fn pack(dir: &Path, output: &Path) -> Result<()> {
    let manifest = Manifest::load(dir)
        .with_context(|| format!("Invalid package directory {}", dir.display()))?;
    if !dir.join(&manifest.hooks.script).is_file() {
        bail!(
            "{} declares hook script '{}' but it is missing",
            manifest.id(),
            manifest.hooks.script
        );
    }

    pack_dir_to_file(dir, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("  Packed {} -> {}", manifest.id(), output.display());
    Ok(())
}
