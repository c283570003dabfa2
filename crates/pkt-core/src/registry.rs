//! SQLite registry of installed packages
//!
//! Tracks installed packages, the files their hooks created, the flags
//! they expose and the reuse counters of build containers. All access goes
//! through one mutex, which also serializes writes from concurrent install
//! tasks.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::{debug, warn};

use pkt_schema::{Location, PackageId, PackageName};

/// Errors from the installed registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Database failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding the connection.
    #[error("Registry lock poisoned: {0}")]
    Lock(String),
}

/// Installed package record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Name the package is installed under.
    pub alias: PackageName,
    /// Installed revision.
    pub id: PackageId,
    /// Version string of `id`.
    pub version: String,
    /// Revision serial.
    pub serial: u64,
    /// Source it was installed from; empty for local artifacts.
    pub location: Location,
    /// `data_dir/<alias>`.
    pub install_dir: PathBuf,
    /// The verified artifact was left in the cache for peers.
    pub in_cache: bool,
    /// Hook script source, kept for the `remove` hook.
    pub script: String,
    /// Unix timestamp.
    pub installed_at: i64,
}

/// A path created by a package's install hook.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Directories are removed after the files in them.
    pub is_dir: bool,
}

/// A user-visible file a package points at (config, binary, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    /// Free-form category, e.g. `bin` or `config`.
    pub kind: String,
    /// Name within the kind.
    pub name: String,
    /// Path, possibly holding `{HOME}`-style placeholders.
    pub path: String,
}

/// Installed-package store.
pub struct InstalledRegistry {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for InstalledRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledRegistry").finish_non_exhaustive()
    }
}

const PACKAGE_COLUMNS: &str =
    "alias, id, version, serial, location, install_dir, in_cache, script, installed_at";

impl InstalledRegistry {
    /// Open database at a specific path
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, RegistryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::with_connection(conn)
    }

    /// A throwaway registry for tests.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS packages (
                alias TEXT NOT NULL UNIQUE,
                id TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                serial INTEGER NOT NULL,
                location TEXT NOT NULL DEFAULT '',
                install_dir TEXT NOT NULL,
                in_cache INTEGER NOT NULL DEFAULT 0,
                script TEXT NOT NULL DEFAULT '',
                installed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS package_files (
                package_id TEXT NOT NULL,
                path TEXT NOT NULL,
                is_dir INTEGER NOT NULL,
                PRIMARY KEY (package_id, path)
            );

            CREATE TABLE IF NOT EXISTS flags (
                package_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (package_id, kind, name)
            );

            CREATE TABLE IF NOT EXISTS build_containers (
                id TEXT PRIMARY KEY,
                dir TEXT NOT NULL,
                uses INTEGER NOT NULL DEFAULT 0
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|e| RegistryError::Lock(e.to_string()))
    }

    /// Get an installed package by its query alias.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on database failure.
    pub fn get(&self, alias: &PackageName) -> Result<Option<InstalledPackage>, RegistryError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {PACKAGE_COLUMNS} FROM packages WHERE alias = ?1"),
            params![alias.as_str()],
            package_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// List all installed packages
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on database failure.
    pub fn list(&self) -> Result<Vec<InstalledPackage>, RegistryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages ORDER BY alias"
        ))?;
        let packages = stmt.query_map([], package_from_row)?;
        packages.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Get all files for a package
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on database failure.
    pub fn files(&self, id: &PackageId) -> Result<Vec<PackageFile>, RegistryError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT path, is_dir FROM package_files WHERE package_id = ?1")?;
        let files = stmt.query_map(params![id.as_str()], |row| {
            let path: String = row.get(0)?;
            Ok(PackageFile {
                path: PathBuf::from(path),
                is_dir: row.get(1)?,
            })
        })?;
        files.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Flags of a package, optionally of one kind only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on database failure.
    pub fn flags(&self, id: &PackageId, kind: Option<&str>) -> Result<Vec<Flag>, RegistryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT kind, name, path FROM flags
             WHERE package_id = ?1 AND (?2 IS NULL OR kind = ?2)
             ORDER BY kind, name",
        )?;
        let flags = stmt.query_map(params![id.as_str(), kind], |row| {
            Ok(Flag {
                kind: row.get(0)?,
                name: row.get(1)?,
                path: row.get(2)?,
            })
        })?;
        flags.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Record a package installation with its files and flags.
    ///
    /// A previous revision under the same alias is replaced. Both happen in
    /// one transaction: if any row fails to write, the previous revision is
    /// left as it was. Should the rollback itself fail, every row written
    /// for `package.id` is deleted before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if any write fails.
    pub fn record(
        &self,
        package: &InstalledPackage,
        files: &[PackageFile],
        flags: &[Flag],
    ) -> Result<(), RegistryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT id FROM packages WHERE alias = ?1",
                params![package.alias.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(previous) = previous {
            debug!(alias = %package.alias, %previous, "replacing installed revision");
            purge(&tx, &previous)?;
        }

        if let Err(e) = write_rows(&tx, package, files, flags) {
            warn!(id = %package.id, error = %e, "registry write failed, rolling back");
            if let Err(rollback) = tx.rollback() {
                warn!(id = %package.id, error = %rollback, "rollback failed, compensating");
                if let Err(cleanup) = purge(&conn, package.id.as_str()) {
                    warn!(id = %package.id, error = %cleanup, "compensating delete failed");
                }
            }
            return Err(e.into());
        }
        tx.commit()?;
        Ok(())
    }

    /// Delete a package and its files and flags. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on database failure.
    pub fn delete(&self, id: &PackageId) -> Result<bool, RegistryError> {
        let conn = self.lock()?;
        Ok(purge(&conn, id.as_str())? > 0)
    }

    /// Register one more use of the build container `key`, creating its
    /// row on first use. Returns the container directory and the new count.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] on database failure.
    pub fn acquire_container(
        &self,
        key: &str,
        dir: &Path,
    ) -> Result<(PathBuf, u64), RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO build_containers (id, dir, uses) VALUES (?1, ?2, 1)
             ON CONFLICT(id) DO UPDATE SET uses = uses + 1",
            params![key, dir.to_string_lossy()],
        )?;
        let (dir, uses): (String, i64) = conn.query_row(
            "SELECT dir, uses FROM build_containers WHERE id = ?1",
            params![key],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((PathBuf::from(dir), uses as u64))
    }
}

fn write_rows(
    conn: &Connection,
    package: &InstalledPackage,
    files: &[PackageFile],
    flags: &[Flag],
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO packages ({PACKAGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            package.alias.as_str(),
            package.id.as_str(),
            package.version,
            package.serial as i64,
            package.location.as_str(),
            package.install_dir.to_string_lossy(),
            package.in_cache,
            package.script,
            package.installed_at,
        ],
    )?;
    for file in files {
        conn.execute(
            "INSERT INTO package_files (package_id, path, is_dir) VALUES (?1, ?2, ?3)",
            params![
                package.id.as_str(),
                file.path.to_string_lossy(),
                file.is_dir
            ],
        )?;
    }
    for flag in flags {
        conn.execute(
            "INSERT OR REPLACE INTO flags (package_id, kind, name, path) VALUES (?1, ?2, ?3, ?4)",
            params![package.id.as_str(), flag.kind, flag.name, flag.path],
        )?;
    }
    Ok(())
}

fn purge(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM package_files WHERE package_id = ?1", params![id])?;
    conn.execute("DELETE FROM flags WHERE package_id = ?1", params![id])?;
    conn.execute("DELETE FROM packages WHERE id = ?1", params![id])
}

fn package_from_row(row: &Row<'_>) -> rusqlite::Result<InstalledPackage> {
    let alias: String = row.get(0)?;
    let id: String = row.get(1)?;
    let serial: i64 = row.get(3)?;
    let location: String = row.get(4)?;
    let install_dir: String = row.get(5)?;
    Ok(InstalledPackage {
        alias: PackageName::new(&alias),
        id: PackageId::from_raw(id),
        version: row.get(2)?,
        serial: serial as u64,
        location: Location::from_raw(location),
        install_dir: PathBuf::from(install_dir),
        in_cache: row.get(6)?,
        script: row.get(7)?,
        installed_at: row.get(8)?,
    })
}
