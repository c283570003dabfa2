//! End-to-end tests that drive the `pkt` binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Test context with an isolated PKT_HOME whose install targets all live
/// inside the temp dir.
struct TestContext {
    _temp_dir: TempDir,
    root: PathBuf,
    pkt_home: PathBuf,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path().canonicalize().expect("canonical temp dir");
        let pkt_home = root.join("home");
        std::fs::create_dir_all(&pkt_home).expect("failed to create pkt home");

        let config = format!(
            "bin_dir = \"{root}/bin\"\n\
             data_dir = \"{root}/opt\"\n\
             cache_dir = \"{root}/cache\"\n\
             lan_discovery = false\n\
             unprivileged_user = \"root\"\n",
            root = root.display()
        );
        std::fs::write(pkt_home.join("config.toml"), config).expect("write config");

        Self {
            _temp_dir: temp_dir,
            root,
            pkt_home,
        }
    }

    fn pkt_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_pkt"));
        cmd.env("PKT_HOME", &self.pkt_home);
        cmd.env("HOME", &self.root);
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.pkt_cmd().args(args).output().expect("failed to run pkt")
    }

    /// Lay out a package directory with a manifest and hook script.
    fn package_dir(&self, name: &str) -> PathBuf {
        let dir = self.root.join("src").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.toml"),
            format!("[package]\nname = \"{name}\"\nversion = \"1.0.0\"\nserial = 1\n"),
        )
        .unwrap();
        std::fs::write(
            dir.join("package.lua"),
            r##"
            function install()
                assert(os.mkdir(path_join(DATA_DIR, "share")))
                local fh = assert(os.open(path_join(DATA_DIR, "share", "tool"), "w"))
                fh:write("#!/bin/sh\n")
                fh:close()
                local link = path_join(BIN_DIR, PACKAGE)
                assert(os.symlink(path_join(DATA_DIR, "share", "tool"), link))
                set_flag("bin", PACKAGE, path_join(BIN_DIR, PACKAGE))
                set_flag("config", "rc", "{HOME}/.toolrc")
            end
            "##,
        )
        .unwrap();
        dir
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    assert!(ctx.run(&["--version"]).status.success());
}

#[test]
fn test_list_creates_registry() {
    let ctx = TestContext::new();
    let output = ctx.run(&["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No packages installed"));
    assert!(ctx.pkt_home.join("installed.db").exists());
}

#[test]
fn test_sync_without_sources() {
    let ctx = TestContext::new();
    assert!(ctx.run(&["sync"]).status.success());
}

#[test]
fn test_pack_rejects_missing_manifest() {
    let ctx = TestContext::new();
    let empty = ctx.root.join("empty");
    std::fs::create_dir_all(&empty).unwrap();
    let out = ctx.root.join("x.pkt");
    let output = ctx.run(&["pack", path(&empty), "-o", path(&out)]);
    assert!(!output.status.success());
    assert!(!out.exists());
}

#[test]
fn test_remove_unknown_package_fails() {
    let ctx = TestContext::new();
    assert!(!ctx.run(&["remove", "ghost"]).status.success());
}

#[test]
fn test_upgrade_with_nothing_installed() {
    let ctx = TestContext::new();
    let output = ctx.run(&["upgrade"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("up to date"));
}

#[test]
fn test_upgrade_unknown_package_fails() {
    let ctx = TestContext::new();
    let output = ctx.run(&["upgrade", "ghost"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ghost"));
}

#[test]
fn test_pack_install_flags_remove() {
    let ctx = TestContext::new();
    let dir = ctx.package_dir("tool");
    let artifact = ctx.root.join("tool-1.0.0.pkt");

    let output = ctx.run(&["pack", path(&dir), "-o", path(&artifact)]);
    assert!(output.status.success(), "{output:?}");
    assert!(artifact.exists());

    let output = ctx.run(&["install", path(&artifact)]);
    assert!(output.status.success(), "{output:?}");
    let bin = ctx.root.join("bin/tool");
    assert!(std::fs::symlink_metadata(&bin).is_ok());

    let listed = stdout(&ctx.run(&["list"]));
    assert!(listed.contains("tool@1.0.0"), "{listed}");

    let flags = stdout(&ctx.run(&["flags", "tool"]));
    assert!(flags.contains(path(&bin)), "{flags}");
    assert!(flags.contains(&format!("{}/.toolrc", ctx.root.display())), "{flags}");

    let only_config = stdout(&ctx.run(&["flags", "tool", "config"]));
    assert!(!only_config.contains(path(&bin)));

    // Installed from a local artifact, so there is nothing to upgrade to.
    let output = ctx.run(&["upgrade", "tool"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("up to date"));

    let output = ctx.run(&["remove", "tool"]);
    assert!(output.status.success(), "{output:?}");
    assert!(std::fs::symlink_metadata(&bin).is_err());
    assert!(stdout(&ctx.run(&["list"])).contains("No packages installed"));
}

fn path(p: &Path) -> &str {
    p.to_str().expect("utf-8 temp path")
}
