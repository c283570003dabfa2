//! Filesystem policy for hook capabilities.
//!
//! Allowed roots always win. Sensitive system locations are denied with a
//! named reason, and anything else is denied by default.

use std::path::{Component, Path, PathBuf};

/// Verdict for a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Path may be touched.
    Allow,
    /// Path is refused, with the reason.
    Deny(String),
}

/// Allow and deny lists a hook's filesystem calls are checked against.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    allowed: Vec<PathBuf>,
    denied: Vec<(PathBuf, &'static str)>,
    /// Carve-outs inside denied roots that are still only allowed if they
    /// fall under an allowed root.
    exempt: Vec<PathBuf>,
    /// Relative paths resolve against this directory.
    cwd: PathBuf,
}

const SYSTEM_DENIED: &[(&str, &str)] = &[
    ("/etc", "system configuration"),
    ("/boot", "boot files"),
    ("/proc", "kernel interface"),
    ("/sys", "kernel interface"),
    ("/dev", "device nodes"),
    ("/usr", "system software"),
    ("/bin", "system binaries"),
    ("/sbin", "system binaries"),
    ("/lib", "system libraries"),
    ("/lib64", "system libraries"),
    ("/var/mail", "user mail"),
    ("/var/run", "runtime state"),
    ("/run", "runtime state"),
    ("/tmp", "shared temporary directory"),
    ("/srv", "served data"),
    ("/mnt", "mount points"),
    ("/media", "removable media"),
    ("/snap", "snap packages"),
];

const HOME_DENIED: &[(&str, &str)] = &[
    (".ssh", "ssh keys"),
    ("Pictures", "user files"),
    ("Videos", "user files"),
    ("Documents", "user files"),
    ("Downloads", "user files"),
];

impl PathPolicy {
    /// Policy allowing only `allowed` (and their descendants). Relative
    /// paths resolve against `cwd`.
    pub fn new(allowed: Vec<PathBuf>, cwd: PathBuf) -> Self {
        let mut denied: Vec<(PathBuf, &'static str)> = SYSTEM_DENIED
            .iter()
            .map(|(p, why)| (PathBuf::from(p), *why))
            .collect();
        if let Some(home) = dirs::home_dir() {
            denied.extend(HOME_DENIED.iter().map(|(p, why)| (home.join(p), *why)));
        }
        Self {
            allowed: allowed.iter().map(|p| resolve(p, &cwd)).collect(),
            denied,
            exempt: vec![PathBuf::from("/usr/share")],
            cwd,
        }
    }

    /// The absolute, normalized form `path` is checked as.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve(path, &self.cwd)
    }

    /// Decide whether a hook may touch `path`.
    pub fn check(&self, path: &Path) -> Decision {
        let resolved = self.resolve(path);

        if self.allowed.iter().any(|root| resolved.starts_with(root)) {
            return Decision::Allow;
        }
        if self.exempt.iter().any(|root| resolved.starts_with(root)) {
            return Decision::Deny("outside the package directories".to_string());
        }
        for (root, why) in &self.denied {
            if resolved.starts_with(root) {
                return Decision::Deny(format!("{why} ({})", root.display()));
            }
        }
        Decision::Deny("outside the package directories".to_string())
    }
}

/// Make `path` absolute against `cwd`, drop `.`/`..` lexically, then
/// canonicalize the deepest existing ancestor so symlinks cannot smuggle
/// a path out of an allowed root.
fn resolve(path: &Path, cwd: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };

    let mut clean = PathBuf::from("/");
    for component in absolute.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::ParentDir => {
                clean.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }

    let mut existing = clean.as_path();
    let mut rest = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return clean,
        }
    }
}
