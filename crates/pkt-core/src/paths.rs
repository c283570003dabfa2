//! Default filesystem locations.

use std::path::PathBuf;

/// Default state directory when `PKT_HOME` is unset.
pub const DEFAULT_HOME: &str = "/var/lib/pkt";

/// Default artifact cache, also what LAN peers serve.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/pkt";

/// Default root for per-package install directories.
pub const DEFAULT_DATA_DIR: &str = "/opt/pkt";

/// Default directory for user-facing executables.
pub const DEFAULT_BIN_DIR: &str = "/usr/local/bin";

/// Returns the state directory, honouring `PKT_HOME`.
pub fn pkt_home() -> PathBuf {
    match std::env::var_os("PKT_HOME") {
        Some(val) if !val.is_empty() => PathBuf::from(val),
        _ => PathBuf::from(DEFAULT_HOME),
    }
}

/// Configuration file: $PKT_HOME/config.toml
pub fn config_path() -> PathBuf {
    pkt_home().join("config.toml")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}

/// Expand `{HOME}` and `{USER}` placeholders in a flag path.
pub fn expand_placeholders(path: &str) -> String {
    let home = dirs::home_dir()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let user = std::env::var("USER").unwrap_or_default();
    path.replace("{HOME}", &home).replace("{USER}", &user)
}
