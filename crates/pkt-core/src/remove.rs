//! Package removal.

use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

use pkt_schema::{HOOK_SCRIPT, PackageName};

use crate::context::Context;
use crate::error::PktError;
use crate::registry::{InstalledPackage, PackageFile};
use crate::sandbox::{self, Hook, HookEnv};

/// Remove an installed package: run its `remove` hook with full
/// privileges, delete its recorded files, then its registry rows.
///
/// # Errors
///
/// Returns [`PktError::NotInstalled`] for unknown names. A failing hook
/// aborts before anything is deleted.
pub async fn remove(ctx: &Context, name: &PackageName) -> Result<InstalledPackage, PktError> {
    let package = ctx
        .registry
        .get(name)?
        .ok_or_else(|| PktError::NotInstalled(name.clone()))?;
    let files = ctx.registry.files(&package.id)?;

    ctx.reporter.removing(&package.alias, &package.version);

    let env = HookEnv {
        package: package.alias.clone(),
        data_dir: package.install_dir.clone(),
        bin_dir: ctx.config.bin_dir.clone(),
        source_dir: package.install_dir.clone(),
        work_dir: package.install_dir.clone(),
        build_root: None,
    };
    let script = package.script.clone();
    let install_dir = package.install_dir.clone();

    ctx.privileges
        .run_privileged(move || -> Result<(), PktError> {
            if !script.is_empty() && env.data_dir.is_dir() {
                sandbox::run_hook(&script, HOOK_SCRIPT, Hook::Remove, &env)?;
            }
            delete_files(&files)?;
            match std::fs::remove_dir_all(&install_dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await??;

    {
        let _root = ctx.privileges.elevated().await;
        if !ctx.registry.delete(&package.id)? {
            warn!(id = %package.id, "registry rows already gone");
        }
    }

    info!(id = %package.id, "removed");
    ctx.reporter.done(&package.alias, &package.version, "removed");
    Ok(package)
}

/// Files and links first, then directories deepest-first. Directories
/// that still hold foreign entries are left in place.
pub(crate) fn delete_files(files: &[PackageFile]) -> std::io::Result<()> {
    for file in files.iter().filter(|f| !f.is_dir) {
        match std::fs::remove_file(&file.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    let mut dirs: Vec<&Path> = files
        .iter()
        .filter(|f| f.is_dir)
        .map(|f| f.path.as_path())
        .collect();
    dirs.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for dir in dirs {
        match std::fs::remove_dir(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!(path = %dir.display(), "keeping directory: {e}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::fetch::Fetcher;
    use crate::index::PackageIndex;
    use crate::registry::{Flag, InstalledRegistry};
    use crate::reporter::NullReporter;
    use crate::sandbox::PrivilegeBracket;
    use crate::testutil::installed;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn context(root: &Path) -> Context {
        let config = Config::rooted_at(root);
        let fetcher =
            Fetcher::new(config.cache_dir.clone(), None, Duration::from_secs(1), 1).unwrap();
        Context::new(
            config,
            PackageIndex::open_in_memory().unwrap(),
            InstalledRegistry::open_in_memory().unwrap(),
            fetcher,
            PrivilegeBracket::disabled(),
            Arc::new(NullReporter),
        )
    }

    #[tokio::test]
    async fn test_remove_runs_hook_and_deletes_files() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let ctx = context(&root);

        let install_dir = ctx.config.package_dir("tool").unwrap();
        let bin = ctx.config.bin_dir.join("tool");
        std::fs::create_dir_all(install_dir.join("share")).unwrap();
        std::fs::create_dir_all(&ctx.config.bin_dir).unwrap();
        std::fs::write(install_dir.join("share/readme"), "hi").unwrap();
        std::os::unix::fs::symlink(install_dir.join("share/readme"), &bin).unwrap();
        std::fs::write(ctx.config.bin_dir.join("other"), "not ours").unwrap();

        let mut package = installed("tool", "1.0", 1, "");
        package.install_dir = install_dir.clone();
        package.script = r#"
            function install() end
            function remove()
                local fh = assert(os.open(path_join(BIN_DIR, "tool.removed"), "w"))
                fh:close()
            end
        "#
        .to_string();
        let files = vec![
            PackageFile { path: install_dir.clone(), is_dir: true },
            PackageFile { path: install_dir.join("share"), is_dir: true },
            PackageFile { path: install_dir.join("share/readme"), is_dir: false },
            PackageFile { path: bin.clone(), is_dir: false },
        ];
        let flags = vec![Flag {
            kind: "bin".into(),
            name: "tool".into(),
            path: bin.display().to_string(),
        }];
        ctx.registry.record(&package, &files, &flags).unwrap();

        let removed = remove(&ctx, &PackageName::new("tool")).await.unwrap();
        assert_eq!(removed.id, package.id);

        assert!(!install_dir.exists());
        assert!(std::fs::symlink_metadata(&bin).is_err());
        assert!(ctx.config.bin_dir.join("other").exists());
        assert!(ctx.config.bin_dir.join("tool.removed").exists());
        assert!(ctx.registry.get(&PackageName::new("tool")).unwrap().is_none());
        assert!(ctx.registry.flags(&package.id, None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_package() {
        let tmp = tempdir().unwrap();
        let ctx = context(tmp.path());
        assert!(matches!(
            remove(&ctx, &PackageName::new("ghost")).await,
            Err(PktError::NotInstalled(_))
        ));
    }

    #[tokio::test]
    async fn test_failing_hook_keeps_package() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let ctx = context(&root);

        let install_dir = ctx.config.package_dir("tool").unwrap();
        std::fs::create_dir_all(&install_dir).unwrap();
        let mut package = installed("tool", "1.0", 1, "");
        package.install_dir = install_dir.clone();
        package.script = "function install() end\nfunction remove() os.remove('/etc') end".into();
        ctx.registry
            .record(
                &package,
                &[PackageFile { path: install_dir.clone(), is_dir: true }],
                &[],
            )
            .unwrap();

        let err = remove(&ctx, &PackageName::new("tool")).await.unwrap_err();
        assert!(matches!(err, PktError::SandboxViolation { .. }));
        assert!(install_dir.exists());
        assert!(ctx.registry.get(&PackageName::new("tool")).unwrap().is_some());
    }
}
