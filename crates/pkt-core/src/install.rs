//! Install orchestration.
//!
//! Each requested package moves through
//!
//! ```text
//! ParseManifest -> Resolve -> FanOut -> Fetch -> Verify -> Extract
//!     -> Prepare -> Build (unprivileged) -> Install (privileged) -> Record -> Done
//! ```
//!
//! Dependencies are installed in waves, leaves first, each wave
//! concurrently and bounded by `max_parallel`. The root waits for every
//! dependency task before its own fetch. A failure aborts only the
//! package it happened in; dependencies that already finished stay
//! installed.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use pkt_schema::{
    DependencyKind, DependencySpec, Location, PackageId, PackageName, PackageRecord,
};

use crate::config::FailurePolicy;
use crate::context::Context;
use crate::error::PktError;
use crate::extract::{ArchiveFormat, decoder, detect_format, extract_reader};
use crate::manifest::Manifest;
use crate::registry::{InstalledPackage, PackageFile};
use crate::resolver::{PlanEntry, ResolvedPlan, Resolver};
use crate::sandbox::{self, Hook, HookEnv, HookOutcome, container};

/// Pipeline states, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    ParseManifest,
    Resolve,
    FanOut,
    Fetch,
    Verify,
    Extract,
    Prepare,
    Build,
    Install,
    Record,
    Done,
}

fn enter(name: &PackageName, stage: Stage) {
    debug!(package = %name, ?stage, "install stage");
}

/// What the user asked to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallTarget {
    /// A package from the index, optionally constrained.
    Named(DependencySpec),
    /// A local artifact file.
    Artifact(PathBuf),
}

impl InstallTarget {
    /// Arguments naming an existing file, or ending in `.pkt`, are
    /// artifacts; everything else is a dependency declaration.
    pub fn parse(arg: &str) -> Self {
        let path = Path::new(arg);
        let looks_like_file = arg.contains('/')
            || path
                .extension()
                .is_some_and(|ext| ext == pkt_schema::ARTIFACT_EXTENSION);
        if looks_like_file || path.is_file() {
            Self::Artifact(path.to_path_buf())
        } else {
            Self::Named(DependencySpec::parse(arg))
        }
    }
}

/// Knobs for [`install`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Install the root even if an equivalent revision is present.
    pub reinstall: bool,
}

/// Outcome of an install request.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Revisions installed by this request, in completion order.
    pub installed: Vec<PackageId>,
    /// Roots that were already present and left alone.
    pub already_installed: Vec<PackageId>,
    /// Packages that failed, with the reason.
    pub failed: Vec<(PackageName, String)>,
}

impl InstallReport {
    /// True when nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Where an artifact comes from.
#[derive(Debug, Clone)]
enum Origin {
    Indexed(PackageRecord),
    Local(PathBuf),
}

/// An artifact whose bytes are in hand and, for indexed packages,
/// verified.
struct Fetched {
    name: PackageName,
    manifest: Manifest,
    bytes: Bytes,
    format: ArchiveFormat,
    location: Location,
    cache_path: Option<PathBuf>,
}

/// Install every target in order.
///
/// # Errors
///
/// Only errors that prevent processing entirely are returned; per-package
/// failures are collected in [`InstallReport::failed`].
pub async fn install(
    ctx: &Context,
    targets: &[InstallTarget],
    options: InstallOptions,
) -> Result<InstallReport, PktError> {
    let started = Instant::now();
    let mut report = InstallReport::default();

    for target in targets {
        let label = match target {
            InstallTarget::Named(spec) => spec.name.clone(),
            InstallTarget::Artifact(path) => PackageName::new(&path.display().to_string()),
        };
        if let Err(e) = install_target(ctx, target, options, &mut report).await {
            ctx.reporter.failed(&label, "", &e.to_string());
            report.failed.push((label, e.to_string()));
        }
    }

    if !report.installed.is_empty() {
        ctx.reporter.summary(
            report.installed.len(),
            "installed",
            started.elapsed().as_secs_f64(),
        );
    }
    Ok(report)
}

async fn install_target(
    ctx: &Context,
    target: &InstallTarget,
    options: InstallOptions,
    report: &mut InstallReport,
) -> Result<(), PktError> {
    match target {
        InstallTarget::Named(spec) => {
            enter(&spec.name, Stage::Resolve);
            let resolver = Resolver::new(&ctx.index, &ctx.registry);
            let record = resolver.pick(spec, &Location::local())?;
            if !options.reinstall && resolver.already_installed(&record)? {
                ctx.reporter
                    .done(&record.name, &record.version, "already installed");
                report.already_installed.push(record.id);
                return Ok(());
            }
            install_indexed(ctx, record, report).await
        }
        InstallTarget::Artifact(path) => {
            let manifest = Manifest::from_artifact(path)?;
            let name = manifest.package.name.clone();
            enter(&name, Stage::ParseManifest);
            enter(&name, Stage::Resolve);
            let plan = Resolver::new(&ctx.index, &ctx.registry).resolve_declared(
                &name,
                &manifest.id(),
                &manifest.edges(),
                &Location::local(),
            )?;
            install_planned(ctx, Origin::Local(path.clone()), &name, &plan, report).await
        }
    }
}

/// Resolve and install one indexed revision, dependencies first.
pub(crate) async fn install_indexed(
    ctx: &Context,
    record: PackageRecord,
    report: &mut InstallReport,
) -> Result<(), PktError> {
    let plan = Resolver::new(&ctx.index, &ctx.registry).resolve(&record.id, &record.location)?;
    let name = record.name.clone();
    install_planned(ctx, Origin::Indexed(record), &name, &plan, report).await
}

async fn install_planned(
    ctx: &Context,
    origin: Origin,
    name: &PackageName,
    plan: &ResolvedPlan,
    report: &mut InstallReport,
) -> Result<(), PktError> {
    enter(name, Stage::FanOut);
    let dependency_failures = fan_out(ctx, plan, report).await;
    if !dependency_failures.is_empty() {
        match ctx.config.dependency_failure {
            FailurePolicy::Abort => {
                return Err(PktError::context(
                    "Dependencies failed",
                    crate::resolver::join_names(&dependency_failures),
                ));
            }
            FailurePolicy::BestEffort => ctx.reporter.warning(&format!(
                "continuing with {name} although {} failed",
                crate::resolver::join_names(&dependency_failures)
            )),
        }
    }

    let id = install_package(ctx, origin).await?;
    report.installed.push(id);
    Ok(())
}

/// Install the plan's dependencies wave by wave. Returns the names that
/// failed.
///
/// # Implementation Note: Concurrency
///
/// Tasks of one wave run concurrently on a `JoinSet`, throttled by a
/// semaphore. Privilege state is process-wide, so the tasks still pass
/// through the bracket one at a time for their unprivileged sections.
/// With the abort policy, a failed wave lets its siblings finish but no
/// later wave starts.
async fn fan_out(
    ctx: &Context,
    plan: &ResolvedPlan,
    report: &mut InstallReport,
) -> Vec<PackageName> {
    let waves = plan.install_waves();
    if waves.is_empty() {
        return Vec::new();
    }
    ctx.reporter.section("Installing dependencies");

    let limit = Arc::new(Semaphore::new(ctx.config.max_parallel.max(1)));
    let mut failures = Vec::new();

    for wave in waves {
        let mut set: JoinSet<(PlanEntry, Result<PackageId, PktError>)> = JoinSet::new();
        for entry in wave {
            let ctx = ctx.clone();
            let limit = limit.clone();
            set.spawn(async move {
                let result = match limit.acquire_owned().await {
                    Ok(_permit) => install_entry(&ctx, &entry).await,
                    Err(e) => Err(PktError::context("Scheduler closed", e)),
                };
                (entry, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(id))) => report.installed.push(id),
                Ok((entry, Err(e))) => {
                    warn!(id = %entry.id, error = %e, "dependency install failed");
                    ctx.reporter.failed(&entry.name, &entry.version, &e.to_string());
                    report.failed.push((entry.name.clone(), e.to_string()));
                    failures.push(entry.name);
                }
                Err(e) => {
                    ctx.reporter.error(&format!("Internal error: {e}"));
                    failures.push(PackageName::new("<task>"));
                }
            }
        }

        if !failures.is_empty() && ctx.config.dependency_failure == FailurePolicy::Abort {
            break;
        }
    }
    failures
}

async fn install_entry(ctx: &Context, entry: &PlanEntry) -> Result<PackageId, PktError> {
    let record = ctx
        .index
        .get(&entry.id, &entry.location)?
        .ok_or_else(|| PktError::context("Planned package vanished from index", &entry.id))?;
    install_package(ctx, Origin::Indexed(record)).await
}

/// Run one package through fetch, verify, extract, hooks and record.
async fn install_package(ctx: &Context, origin: Origin) -> Result<PackageId, PktError> {
    let fetched = fetch(ctx, origin).await?;
    let name = fetched.name.clone();
    let version = fetched.manifest.package.version.clone();
    let id = fetched.manifest.id();
    let install_dir = ctx.config.package_dir(&name)?;

    let work_root = ctx.config.tmp_dir();
    tokio::fs::create_dir_all(&work_root).await?;
    let work = tempfile::Builder::new()
        .prefix(&format!("{name}-"))
        .tempdir_in(&work_root)?;
    ctx.privileges.hand_over(work.path())?;

    let build_deps = fetched.manifest.dependencies.of_kind(DependencyKind::Build).to_vec();
    let container = container::acquire(&ctx.registry, &ctx.config.containers_dir(), &build_deps)?;
    if let Some(container) = &container {
        ctx.privileges.hand_over(&container.root)?;
    }

    let env = HookEnv {
        package: name.clone(),
        data_dir: install_dir.clone(),
        bin_dir: ctx.config.bin_dir.clone(),
        source_dir: work.path().to_path_buf(),
        work_dir: work.path().to_path_buf(),
        build_root: container.map(|c| c.root),
    };

    let script = stage_unprivileged(ctx, &fetched, env.clone()).await?;

    ctx.reporter.installing(&name, &version);
    let outcome = install_privileged(ctx, &name, script.clone(), &fetched.manifest, env).await?;

    enter(&name, Stage::Record);
    let mut files = vec![PackageFile {
        path: install_dir.clone(),
        is_dir: true,
    }];
    files.extend(outcome.files.into_iter().filter(|f| f.path != install_dir));

    let in_cache = fetched.cache_path.is_some() && ctx.config.keep_artifacts;
    let installed = InstalledPackage {
        alias: name.clone(),
        id: id.clone(),
        version: version.clone(),
        serial: fetched.manifest.package.serial,
        location: fetched.location.clone(),
        install_dir,
        in_cache,
        script,
        installed_at: chrono::Utc::now().timestamp(),
    };
    {
        let _root = ctx.privileges.elevated().await;
        ctx.registry.record(&installed, &files, &outcome.flags)?;
        if !ctx.config.keep_artifacts {
            if let Some(path) = &fetched.cache_path {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    debug!(path = %path.display(), "could not drop cached artifact: {e}");
                }
            }
        }
    }

    enter(&name, Stage::Done);
    info!(%id, files = files.len(), "installed");
    ctx.reporter.done(&name, &version, "installed");
    drop(work);
    Ok(id)
}

/// Obtain the artifact bytes and its manifest.
async fn fetch(ctx: &Context, origin: Origin) -> Result<Fetched, PktError> {
    match origin {
        Origin::Indexed(record) => {
            enter(&record.name, Stage::Fetch);
            ctx.reporter.fetching(&record.name, &record.version);
            let mirrors = ctx.config.mirrors_for(&record);
            let trusted = ctx.config.is_trusted(&record.location);
            let fetched = {
                let _root = ctx.privileges.elevated().await;
                ctx.fetcher
                    .fetch_verified(&record, &mirrors, trusted, &ctx.config.trusted_key)
                    .await?
            };
            enter(&record.name, Stage::Verify);
            debug!(id = %record.id, source = ?fetched.source, "artifact verified");

            enter(&record.name, Stage::ParseManifest);
            let format = detect_format(&fetched.path)?;
            let manifest =
                Manifest::from_tar(decoder(Cursor::new(fetched.bytes.clone()), format)?)?;
            manifest.check_matches(&record)?;

            Ok(Fetched {
                name: record.name.clone(),
                manifest,
                bytes: fetched.bytes,
                format,
                location: record.location,
                cache_path: Some(fetched.path),
            })
        }
        Origin::Local(path) => {
            let format = detect_format(&path)?;
            let bytes = Bytes::from(tokio::fs::read(&path).await?);
            enter(&PackageName::new(&path.display().to_string()), Stage::ParseManifest);
            let manifest = Manifest::from_tar(decoder(Cursor::new(bytes.clone()), format)?)?;
            Ok(Fetched {
                name: manifest.package.name.clone(),
                manifest,
                bytes,
                format,
                location: Location::local(),
                cache_path: None,
            })
        }
    }
}

/// Extract, then run `prepare` and `build`, as the unprivileged account.
/// Returns the hook script source.
async fn stage_unprivileged(
    ctx: &Context,
    fetched: &Fetched,
    env: HookEnv,
) -> Result<String, PktError> {
    let bytes = fetched.bytes.clone();
    let format = fetched.format;
    let script_name = fetched.manifest.hooks.script.clone();

    ctx.privileges
        .run_unprivileged(move || -> Result<String, PktError> {
            enter(&env.package, Stage::Extract);
            let entries =
                extract_reader(Cursor::new(bytes), format, &env.work_dir, &script_name)?;
            debug!(package = %env.package, entries = entries.len(), "extracted");

            let script = std::fs::read_to_string(env.work_dir.join(&script_name))?;

            enter(&env.package, Stage::Prepare);
            sandbox::run_hook(&script, &script_name, Hook::Prepare, &env)?;
            enter(&env.package, Stage::Build);
            sandbox::run_hook(&script, &script_name, Hook::Build, &env)?;
            Ok(script)
        })
        .await?
}

/// Run the `install` hook with full privileges. A failed hook leaves no
/// install directory behind if it did not exist before.
async fn install_privileged(
    ctx: &Context,
    name: &PackageName,
    script: String,
    manifest: &Manifest,
    env: HookEnv,
) -> Result<HookOutcome, PktError> {
    enter(name, Stage::Install);
    let script_name = manifest.hooks.script.clone();

    ctx.privileges
        .run_privileged(move || -> Result<HookOutcome, PktError> {
            let fresh = !env.data_dir.exists();
            std::fs::create_dir_all(&env.data_dir)?;
            std::fs::create_dir_all(&env.bin_dir)?;

            let result = sandbox::run_hook(&script, &script_name, Hook::Install, &env);
            if result.is_err() && fresh {
                if let Err(e) = std::fs::remove_dir_all(&env.data_dir) {
                    warn!(path = %env.data_dir.display(), "cleanup after failed install: {e}");
                }
            }
            result.map_err(PktError::from)
        })
        .await?
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{Config, SourceConfig};
    use crate::extract::pack_dir_to_file;
    use crate::fetch::{Fetcher, sha256_hex};
    use crate::index::PackageIndex;
    use crate::registry::InstalledRegistry;
    use crate::reporter::NullReporter;
    use crate::sandbox::PrivilegeBracket;
    use crate::testutil::source_pkg;
    use pkt_schema::{DependencySpec, SourcePackage};
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    pub(crate) const INSTALL_SCRIPT: &str = r#"
        function build()
            local fh = assert(os.open(path_join(WORK_DIR, "built"), "w"))
            fh:write("ok")
            fh:close()
        end

        function install()
            assert(os.copy(path_join(SOURCE_DIR, "built"), path_join(DATA_DIR, "built")))
            assert(os.symlink(path_join(DATA_DIR, "built"), path_join(BIN_DIR, PACKAGE)))
            set_flag("bin", PACKAGE, path_join(BIN_DIR, PACKAGE))
        end
    "#;

    pub(crate) struct Harness {
        _home: TempDir,
        pub(crate) ctx: Context,
        pub(crate) artifacts: PathBuf,
    }

    /// A context rooted in a temp dir, with artifacts served from a local
    /// directory through the cache.
    pub(crate) fn harness(
        location: &str,
        packages: Vec<SourcePackage>,
        policy: FailurePolicy,
    ) -> Harness {
        let home = tempdir().unwrap();
        let root = home.path().canonicalize().unwrap();
        let mut config = Config::rooted_at(&root);
        config.lan_discovery = false;
        config.dependency_failure = policy;
        config.sources = vec![SourceConfig {
            url: format!("https://{location}/index.json"),
            trusted: false,
        }];
        config.max_parallel = 2;

        let index = PackageIndex::open_in_memory().unwrap();
        index
            .replace_location(&Location::from_raw(location), packages)
            .unwrap();
        let fetcher = Fetcher::new(config.cache_dir.clone(), None, Duration::from_secs(5), 1)
            .unwrap()
            .with_retry_delay(Duration::ZERO);
        let artifacts = config.cache_dir.clone();
        std::fs::create_dir_all(&artifacts).unwrap();

        let ctx = Context::new(
            config,
            index,
            InstalledRegistry::open_in_memory().unwrap(),
            fetcher,
            PrivilegeBracket::disabled(),
            Arc::new(NullReporter),
        );
        Harness {
            _home: home,
            ctx,
            artifacts,
        }
    }

    /// Build an artifact for `pkg` and return its checksum.
    fn build_artifact(dir: &Path, pkg: &SourcePackage, script: &str) -> String {
        let src = tempdir().unwrap();
        let runtime: Vec<String> = pkg
            .dependencies
            .runtime
            .iter()
            .map(|d| format!("\"{d}\""))
            .collect();
        std::fs::write(
            src.path().join("manifest.toml"),
            format!(
                "[package]\nname = \"{}\"\nversion = \"{}\"\nserial = {}\n\n\
                 [dependencies]\nruntime = [{}]\n",
                pkg.name,
                pkg.version,
                pkg.serial,
                runtime.join(", ")
            ),
        )
        .unwrap();
        std::fs::write(src.path().join("package.lua"), script).unwrap();

        let out = dir.join(format!("{}-{}.pkt", pkg.name, pkg.version));
        pack_dir_to_file(src.path(), &out).unwrap();
        sha256_hex(&std::fs::read(&out).unwrap()).to_string()
    }

    pub(crate) fn publish(dir: &Path, mut pkg: SourcePackage, script: &str) -> SourcePackage {
        pkg.checksum = build_artifact(dir, &pkg, script).into();
        pkg
    }

    #[test]
    fn test_target_parsing() {
        assert_eq!(
            InstallTarget::parse(">=foo@1.2"),
            InstallTarget::Named(DependencySpec::parse(">=foo@1.2"))
        );
        assert_eq!(
            InstallTarget::parse("./foo-1.0.pkt"),
            InstallTarget::Artifact(PathBuf::from("./foo-1.0.pkt"))
        );
        assert!(matches!(
            InstallTarget::parse("foo-1.0.pkt"),
            InstallTarget::Artifact(_)
        ));
    }

    #[tokio::test]
    async fn test_install_with_dependencies() {
        let staging = tempdir().unwrap();
        let lib = publish(staging.path(), source_pkg("lib", "1.0", 1, &[], &[]), INSTALL_SCRIPT);
        let app = publish(
            staging.path(),
            source_pkg("app", "2.0", 4, &["lib"], &[]),
            INSTALL_SCRIPT,
        );

        let h = harness("repo.example.org", vec![lib, app], FailurePolicy::Abort);
        for entry in std::fs::read_dir(staging.path()).unwrap() {
            let entry = entry.unwrap();
            std::fs::copy(entry.path(), h.artifacts.join(entry.file_name())).unwrap();
        }

        let report = install(
            &h.ctx,
            &[InstallTarget::parse("app")],
            InstallOptions::default(),
        )
        .await
        .unwrap();

        assert!(report.is_success(), "{:?}", report.failed);
        let ids: Vec<&str> = report.installed.iter().map(PackageId::as_str).collect();
        assert_eq!(ids, vec!["lib@1.0", "app@2.0"]);

        let app = h.ctx.registry.get(&PackageName::new("app")).unwrap().unwrap();
        assert_eq!(app.serial, 4);
        assert!(app.in_cache);
        assert!(app.script.contains("function install"));
        assert_eq!(
            std::fs::read_to_string(app.install_dir.join("built")).unwrap(),
            "ok"
        );
        assert!(h.ctx.config.bin_dir.join("app").exists());

        let files = h.ctx.registry.files(&app.id).unwrap();
        assert!(files.iter().any(|f| f.path == app.install_dir && f.is_dir));
        assert!(files.iter().any(|f| f.path == h.ctx.config.bin_dir.join("app")));
        assert_eq!(h.ctx.registry.flags(&app.id, Some("bin")).unwrap().len(), 1);

        // A second request is a no-op.
        let again = install(
            &h.ctx,
            &[InstallTarget::parse("app")],
            InstallOptions::default(),
        )
        .await
        .unwrap();
        assert!(again.installed.is_empty());
        assert_eq!(again.already_installed.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_rejected_and_dropped() {
        let staging = tempdir().unwrap();
        let mut pkg = publish(
            staging.path(),
            source_pkg("foo", "1.0", 1, &[], &[]),
            INSTALL_SCRIPT,
        );
        pkg.checksum = sha256_hex(b"something else");

        let h = harness("repo.example.org", vec![pkg], FailurePolicy::Abort);
        std::fs::copy(
            staging.path().join("foo-1.0.pkt"),
            h.artifacts.join("foo-1.0.pkt"),
        )
        .unwrap();

        let report = install(&h.ctx, &[InstallTarget::parse("foo")], InstallOptions::default())
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("Integrity"));
        assert!(!h.artifacts.join("foo-1.0.pkt").exists());
        assert!(h.ctx.registry.get(&PackageName::new("foo")).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_dependency_policy() {
        let staging = tempdir().unwrap();
        let broken = publish(
            staging.path(),
            source_pkg("broken", "1.0", 1, &[], &[]),
            "function install() error('nope') end",
        );
        let app = publish(
            staging.path(),
            source_pkg("app", "1.0", 1, &["broken"], &[]),
            INSTALL_SCRIPT,
        );

        let policies = [
            (FailurePolicy::Abort, false),
            (FailurePolicy::BestEffort, true),
        ];
        for (policy, root_installed) in policies {
            let h = harness("repo.example.org", vec![broken.clone(), app.clone()], policy);
            for file in ["broken-1.0.pkt", "app-1.0.pkt"] {
                std::fs::copy(staging.path().join(file), h.artifacts.join(file)).unwrap();
            }

            let report = install(&h.ctx, &[InstallTarget::parse("app")], InstallOptions::default())
                .await
                .unwrap();
            assert!(report.failed.iter().any(|(name, _)| name == "broken"));
            assert_eq!(
                h.ctx.registry.get(&PackageName::new("app")).unwrap().is_some(),
                root_installed
            );
            assert!(!h.ctx.config.package_dir("broken").unwrap().exists());
        }
    }

    #[tokio::test]
    async fn test_local_artifact_sandbox_violation() {
        let staging = tempdir().unwrap();
        let pkg = source_pkg("evil", "1.0", 1, &[], &[]);
        build_artifact(
            staging.path(),
            &pkg,
            "function install() os.remove('/etc/passwd') end",
        );

        let h = harness("repo.example.org", vec![], FailurePolicy::Abort);
        let target = InstallTarget::Artifact(staging.path().join("evil-1.0.pkt"));
        let report = install(&h.ctx, &[target], InstallOptions::default())
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("Sandbox violation"));
        assert!(h.ctx.registry.list().unwrap().is_empty());
    }
    #[tokio::test]
    async fn test_local_artifact_name_cannot_escape_data_dir() {
        let staging = tempdir().unwrap();
        let src = tempdir().unwrap();
        std::fs::write(
            src.path().join("manifest.toml"),
            "[package]\nname = \"../outside\"\nversion = \"1.0\"\nserial = 1\n",
        )
        .unwrap();
        std::fs::write(
            src.path().join("package.lua"),
            r#"
            function install()
                local fh = assert(os.open(path_join(DATA_DIR, "pwned"), "w"))
                fh:write("x")
                fh:close()
            end
            "#,
        )
        .unwrap();
        let artifact = staging.path().join("outside-1.0.pkt");
        pack_dir_to_file(src.path(), &artifact).unwrap();

        let h = harness("repo.example.org", vec![], FailurePolicy::Abort);
        let report = install(
            &h.ctx,
            &[InstallTarget::Artifact(artifact)],
            InstallOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.contains("not a plain file name"), "{:?}", report.failed);
        let escaped = h.ctx.config.data_dir.join("../outside");
        assert!(!escaped.exists());
        assert!(h.ctx.registry.list().unwrap().is_empty());
    }
}
