//! Runtime configuration.
//!
//! Loaded from `$PKT_HOME/config.toml` when present. Every field has a
//! default, so an empty or missing file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pkt_schema::{DISCOVERY_PORT, Location, PKT_PUBLIC_KEY, PackageRecord, is_path_component};

use crate::paths::{self, DEFAULT_BIN_DIR, DEFAULT_CACHE_DIR, DEFAULT_DATA_DIR};

/// Failures loading the configuration or deriving paths from it.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`].
    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },

    /// A package name that would resolve outside the data directory.
    #[error("'{0}' cannot name a directory under the data directory")]
    UnsafePackageName(String),
}

/// What to do with the root package when one of its dependencies fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop before touching the root package.
    #[default]
    Abort,
    /// Report the failure and carry on with the remaining packages.
    BestEffort,
}

/// A sync source: a URL serving a complete package list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// URL of the JSON package list (optionally zstd-compressed).
    pub url: String,
    /// Signed with the trusted key; list and artifacts are signature-checked.
    #[serde(default)]
    pub trusted: bool,
}

impl SourceConfig {
    /// Normalized location of this source.
    pub fn location(&self) -> Location {
        Location::from_url(&self.url)
    }

    /// Base URL artifacts are served under (the list URL minus its filename).
    pub fn artifact_base(&self) -> String {
        let url = self.url.trim_end_matches('/');
        match url.rsplit_once('/') {
            Some((base, last)) if last.contains('.') && !base.ends_with('/') => base.to_string(),
            _ => url.to_string(),
        }
    }
}

/// Runtime configuration, read from `$PKT_HOME/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// State directory (databases, scratch space, build containers).
    #[serde(skip)]
    pub home: PathBuf,
    /// Where packages link their executables.
    pub bin_dir: PathBuf,
    /// Parent of every package install directory.
    pub data_dir: PathBuf,
    /// Downloaded artifacts.
    pub cache_dir: PathBuf,
    /// Package sources, synced in order.
    pub sources: Vec<SourceConfig>,
    /// Extra mirrors tried after a package's own source.
    pub mirrors: Vec<String>,
    /// Base64 Ed25519 public key for trusted sources.
    pub trusted_key: String,
    /// Ask peers on the local network before the network sources.
    pub lan_discovery: bool,
    /// UDP port for peer discovery.
    pub discovery_port: u16,
    /// How long to collect peer replies.
    pub discovery_window_ms: u64,
    /// Port our own peer server listens on (advertised by the responder).
    pub http_port: u16,
    /// Account that extraction and build hooks run as.
    pub unprivileged_user: String,
    /// Keep verified artifacts in the cache so peers can fetch them.
    pub keep_artifacts: bool,
    /// What a failed dependency does to the rest of the plan.
    pub dependency_failure: FailurePolicy,
    /// Upper bound on concurrent dependency installs.
    pub max_parallel: usize,
    /// Per-request timeout.
    pub fetch_timeout_secs: u64,
    /// Attempts per URL before moving on.
    pub fetch_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: paths::pkt_home(),
            bin_dir: PathBuf::from(DEFAULT_BIN_DIR),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            sources: Vec::new(),
            mirrors: Vec::new(),
            trusted_key: PKT_PUBLIC_KEY.to_string(),
            lan_discovery: true,
            discovery_port: DISCOVERY_PORT,
            discovery_window_ms: 2000,
            http_port: 9123,
            unprivileged_user: "pkt".to_string(),
            keep_artifacts: true,
            dependency_failure: FailurePolicy::Abort,
            max_parallel: num_cpus::get().max(1),
            fetch_timeout_secs: 300,
            fetch_retries: 3,
        }
    }
}

impl Config {
    /// Load `$PKT_HOME/config.toml`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = paths::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load a specific config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults rooted entirely under `home` (tests, unprivileged setups).
    pub fn rooted_at(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
            bin_dir: home.join("bin"),
            data_dir: home.join("data"),
            cache_dir: home.join("cache"),
            ..Self::default()
        }
    }

    /// Synced package index database.
    pub fn index_db_path(&self) -> PathBuf {
        self.home.join("index.db")
    }

    /// Installed package registry database.
    pub fn installed_db_path(&self) -> PathBuf {
        self.home.join("installed.db")
    }

    /// Scratch space for per-install work directories.
    pub fn tmp_dir(&self) -> PathBuf {
        self.home.join("tmp")
    }

    /// Shared build-dependency containers.
    pub fn containers_dir(&self) -> PathBuf {
        self.home.join("containers")
    }

    /// Install directory of one package, always a direct child of
    /// `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnsafePackageName`] if `name` is not a plain
    /// path component.
    pub fn package_dir(&self, name: &str) -> Result<PathBuf, ConfigError> {
        if !is_path_component(name) {
            return Err(ConfigError::UnsafePackageName(name.to_string()));
        }
        let dir = self.data_dir.join(name);
        if dir.parent() != Some(self.data_dir.as_path()) {
            return Err(ConfigError::UnsafePackageName(name.to_string()));
        }
        Ok(dir)
    }

    /// Whether records from `location` are covered by the trusted key.
    pub fn is_trusted(&self, location: &Location) -> bool {
        self.sources
            .iter()
            .any(|s| s.trusted && &s.location() == location)
    }

    /// Mirror base URLs for a record: its own source first, then the extras.
    pub fn mirrors_for(&self, record: &PackageRecord) -> Vec<String> {
        let mut mirrors: Vec<String> = self
            .sources
            .iter()
            .filter(|s| s.location() == record.location)
            .map(SourceConfig::artifact_base)
            .collect();
        for extra in &self.mirrors {
            let extra = extra.trim_end_matches('/').to_string();
            if !mirrors.contains(&extra) {
                mirrors.push(extra);
            }
        }
        mirrors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            bin_dir = "/opt/bin"
            dependency_failure = "best-effort"
            mirrors = ["https://mirror.example.org/pkt/"]

            [[sources]]
            url = "https://repo.example.org/pkt/index.json"
            trusted = true
            "#,
        )
        .unwrap();

        assert_eq!(config.bin_dir, PathBuf::from("/opt/bin"));
        assert_eq!(config.dependency_failure, FailurePolicy::BestEffort);
        assert_eq!(config.fetch_retries, 3);
        assert!(config.is_trusted(&Location::from_raw("repo.example.org/pkt")));
        assert!(!config.is_trusted(&Location::from_raw("mirror.example.org/pkt")));
    }

    #[test]
    fn test_artifact_base() {
        let source = SourceConfig {
            url: "https://repo.example.org/pkt/index.json".into(),
            trusted: false,
        };
        assert_eq!(source.artifact_base(), "https://repo.example.org/pkt");

        let bare = SourceConfig {
            url: "https://repo.example.org/pkt/".into(),
            trusted: false,
        };
        assert_eq!(bare.artifact_base(), "https://repo.example.org/pkt");
    }

    #[test]
    fn test_load_from_reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_parallel = \"many\"").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
    #[test]
    fn test_package_dir_stays_under_data_dir() {
        let config = Config::rooted_at(Path::new("/srv/pkt"));
        assert_eq!(
            config.package_dir("ripgrep").unwrap(),
            config.data_dir.join("ripgrep")
        );
        for name in ["", ".", "..", "../../etc", "a/b", "/etc", "x\0y"] {
            assert!(
                matches!(
                    config.package_dir(name),
                    Err(ConfigError::UnsafePackageName(_))
                ),
                "{name:?}"
            );
        }
    }
}
