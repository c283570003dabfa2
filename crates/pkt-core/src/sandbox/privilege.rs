//! Process-wide privilege bracket.
//!
//! `setresuid`/`setresgid` change the credentials of every thread in the
//! process, so the unprivileged section is exclusive: it holds the write
//! side of a lock while every root-state section (privileged hooks, cache
//! writes, registry commits) holds the read side.

use std::path::Path;
use std::sync::Arc;

use nix::unistd::{
    Gid, Uid, User, chown, getegid, geteuid, getgroups, setgroups, setresgid, setresuid,
};
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard};

/// Errors from switching credentials.
#[derive(Error, Debug)]
pub enum PrivilegeError {
    /// The configured account does not exist.
    #[error("Unknown user '{0}'")]
    UnknownUser(String),

    /// Reading the account database failed.
    #[error("User lookup failed: {0}")]
    Lookup(nix::Error),

    /// Could not switch to the unprivileged account.
    #[error("Failed to drop privileges: {0}")]
    Drop(nix::Error),

    /// Could not switch back to root.
    #[error("Failed to restore privileges: {0}")]
    Restore(nix::Error),

    /// Could not give a directory to the unprivileged account.
    #[error("Failed to hand {path} to the build user: {source}")]
    Chown {
        /// Directory being handed over.
        path: String,
        /// Underlying errno.
        source: nix::Error,
    },

    /// The blocking task panicked or was cancelled.
    #[error("Sandboxed task did not complete: {0}")]
    Join(String),
}

/// Ids of the account unprivileged work runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    /// User id.
    pub uid: Uid,
    /// Primary group id.
    pub gid: Gid,
}

/// Serializes privileged and unprivileged sections of the process.
///
/// Credentials are process-wide, so an unprivileged section excludes every
/// other section while it runs.
#[derive(Debug)]
pub struct PrivilegeBracket {
    lock: Arc<RwLock<()>>,
    /// `None` when not running as root: sections run as the current user.
    target: Option<Credentials>,
}

impl PrivilegeBracket {
    /// Bracket dropping to `user`. Without root there is nothing to drop
    /// and the bracket only serializes.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::UnknownUser`] if running as root and
    /// `user` does not exist.
    pub fn for_user(user: &str) -> Result<Self, PrivilegeError> {
        if !geteuid().is_root() {
            tracing::debug!("not running as root, privilege bracket disabled");
            return Ok(Self::disabled());
        }
        let account = User::from_name(user)
            .map_err(PrivilegeError::Lookup)?
            .ok_or_else(|| PrivilegeError::UnknownUser(user.to_string()))?;
        Ok(Self {
            lock: Arc::new(RwLock::new(())),
            target: Some(Credentials {
                uid: account.uid,
                gid: account.gid,
            }),
        })
    }

    /// Bracket that never switches credentials.
    pub fn disabled() -> Self {
        Self {
            lock: Arc::new(RwLock::new(())),
            target: None,
        }
    }

    /// Account unprivileged sections run as, if any.
    pub fn target(&self) -> Option<Credentials> {
        self.target
    }

    /// Hold root state across async work (cache and registry writes).
    pub async fn elevated(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Run `f` on a blocking thread with full privileges.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::Join`] if `f` panicked.
    pub async fn run_privileged<F, T>(&self, f: F) -> Result<T, PrivilegeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.lock.read().await;
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| PrivilegeError::Join(e.to_string()))
    }

    /// Run `f` on a blocking thread as the unprivileged account. No other
    /// section runs until privileges are restored.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError`] if dropping or restoring fails or `f`
    /// panicked.
    pub async fn run_unprivileged<F, T>(&self, f: F) -> Result<T, PrivilegeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.lock.write().await;
        let target = self.target;
        tokio::task::spawn_blocking(move || {
            let dropped = Dropped::enter(target)?;
            let out = f();
            dropped.restore()?;
            Ok(out)
        })
        .await
        .map_err(|e| PrivilegeError::Join(e.to_string()))?
    }

    /// Give `path` to the unprivileged account so it can write there.
    ///
    /// # Errors
    ///
    /// Returns [`PrivilegeError::Chown`] on failure.
    pub fn hand_over(&self, path: &Path) -> Result<(), PrivilegeError> {
        let Some(target) = self.target else {
            return Ok(());
        };
        chown(path, Some(target.uid), Some(target.gid)).map_err(|source| PrivilegeError::Chown {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Effective credentials switched to the target until restored. Saved ids
/// stay root so the switch can be undone. Supplementary groups are cut down
/// to the target's primary group and put back on restore.
struct Dropped {
    /// Root's supplementary groups while dropped, `None` when inactive.
    saved_groups: Option<Vec<Gid>>,
}

impl Dropped {
    fn enter(target: Option<Credentials>) -> Result<Self, PrivilegeError> {
        let Some(target) = target else {
            return Ok(Self { saved_groups: None });
        };
        let groups = getgroups().map_err(PrivilegeError::Drop)?;
        setgroups(&[target.gid]).map_err(PrivilegeError::Drop)?;

        let root_gid = getegid();
        if let Err(e) = setresgid(target.gid, target.gid, root_gid) {
            restore_groups(&groups);
            return Err(PrivilegeError::Drop(e));
        }
        if let Err(e) = setresuid(target.uid, target.uid, Uid::from_raw(0)) {
            if let Err(undo) = setresgid(root_gid, root_gid, root_gid) {
                tracing::warn!(gid = %root_gid, "could not restore gid after failed drop: {undo}");
            }
            restore_groups(&groups);
            return Err(PrivilegeError::Drop(e));
        }
        tracing::debug!(uid = %target.uid, gid = %target.gid, "dropped privileges");
        Ok(Self {
            saved_groups: Some(groups),
        })
    }

    fn restore(mut self) -> Result<(), PrivilegeError> {
        match self.saved_groups.take() {
            Some(groups) => restore_root(&groups),
            None => Ok(()),
        }
    }
}

impl Drop for Dropped {
    fn drop(&mut self) {
        let Some(groups) = self.saved_groups.take() else {
            return;
        };
        if let Err(e) = restore_root(&groups) {
            tracing::error!("could not restore privileges after panic: {e}");
        }
    }
}

fn restore_groups(groups: &[Gid]) {
    if let Err(e) = setgroups(groups) {
        tracing::warn!("could not restore supplementary groups: {e}");
    }
}

fn restore_root(groups: &[Gid]) -> Result<(), PrivilegeError> {
    let root = Uid::from_raw(0);
    setresuid(root, root, root).map_err(PrivilegeError::Restore)?;
    let root_gid = Gid::from_raw(0);
    setresgid(root_gid, root_gid, root_gid).map_err(PrivilegeError::Restore)?;
    setgroups(groups).map_err(PrivilegeError::Restore)?;
    tracing::debug!("restored privileges");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_disabled_bracket_runs_sections() {
        let bracket = PrivilegeBracket::disabled();
        assert_eq!(bracket.run_unprivileged(|| 2 + 2).await.unwrap(), 4);
        assert_eq!(bracket.run_privileged(|| "root").await.unwrap(), "root");
        assert!(bracket.hand_over(Path::new("/nonexistent")).is_ok());
    }

    #[tokio::test]
    async fn test_unprivileged_section_is_exclusive() {
        let bracket = Arc::new(PrivilegeBracket::disabled());
        let inside = Arc::new(AtomicBool::new(false));

        let unpriv = {
            let bracket = bracket.clone();
            let inside = inside.clone();
            tokio::spawn(async move {
                bracket
                    .run_unprivileged(move || {
                        inside.store(true, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(100));
                        inside.store(false, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let overlapped = {
            let inside = inside.clone();
            bracket
                .run_privileged(move || inside.load(Ordering::SeqCst))
                .await
                .unwrap()
        };
        unpriv.await.unwrap();
        assert!(!overlapped);
    }

    #[tokio::test]
    async fn test_panicking_section_reports_join_error() {
        let bracket = PrivilegeBracket::disabled();
        let result: Result<(), _> = bracket.run_unprivileged(|| panic!("boom")).await;
        assert!(matches!(result, Err(PrivilegeError::Join(_))));
        // The lock is released afterwards.
        assert!(bracket.run_privileged(|| ()).await.is_ok());
    }
}
