//! Local copy of the remote package index.
//!
//! Read-mostly: the resolver queries it, and only `sync` writes it, one
//! whole location at a time.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::debug;

use pkt_schema::{
    DependencyEdge, DependencyKind, Location, PackageId, PackageName, PackageRecord, Sha256Hash,
    SourcePackage, VersionConstraint,
};

/// Failures reading or writing the index database.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Query or schema failure.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Another thread panicked while holding the connection.
    #[error("Index lock poisoned: {0}")]
    Lock(String),

    /// A synced entry cannot be stored safely.
    #[error("Package '{name}' has an invalid {field}")]
    InvalidPackage {
        /// Name as listed by the source.
        name: String,
        /// Offending field.
        field: &'static str,
    },
}

/// Bumped whenever the table layout changes. The index is a cache of the
/// sources, so older layouts are dropped and rebuilt by the next sync.
const SCHEMA_VERSION: i64 = 2;

const PACKAGE_COLUMNS: &str = "id, name, alias, version, serial, maintainer, verified, \
     description, uploaded_at, location, checksum, signature, size";

fn edge_table(kind: DependencyKind) -> &'static str {
    match kind {
        DependencyKind::Runtime => "runtime_dependencies",
        DependencyKind::Build => "build_dependencies",
        DependencyKind::Conflict => "conflicts",
    }
}

/// Known remote packages and their dependency edges.
pub struct PackageIndex {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for PackageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageIndex").finish_non_exhaustive()
    }
}

impl PackageIndex {
    /// Open or create the index database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if the file cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::with_connection(conn)
    }

    /// A throwaway index (tests, dry runs).
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, IndexError> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            debug!(from = version, to = SCHEMA_VERSION, "rebuilding index schema");
            conn.execute_batch(
                "
                DROP TABLE IF EXISTS packages;
                DROP TABLE IF EXISTS runtime_dependencies;
                DROP TABLE IF EXISTS build_dependencies;
                DROP TABLE IF EXISTS conflicts;
                ",
            )?;
        }

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS packages (
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                alias TEXT NOT NULL,
                version TEXT NOT NULL,
                serial INTEGER NOT NULL,
                maintainer TEXT NOT NULL DEFAULT '',
                verified INTEGER NOT NULL DEFAULT 0,
                description TEXT NOT NULL DEFAULT '',
                uploaded_at INTEGER NOT NULL DEFAULT 0,
                location TEXT NOT NULL,
                checksum TEXT NOT NULL DEFAULT '',
                signature TEXT NOT NULL DEFAULT '',
                size INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (id, location)
            );
            CREATE INDEX IF NOT EXISTS idx_packages_alias ON packages(alias);
            CREATE INDEX IF NOT EXISTS idx_packages_location ON packages(location);

            CREATE TABLE IF NOT EXISTS runtime_dependencies (
                package_id TEXT NOT NULL,
                location TEXT NOT NULL,
                dependency TEXT NOT NULL,
                version_constraint TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (package_id, location, dependency)
            );
            CREATE TABLE IF NOT EXISTS build_dependencies (
                package_id TEXT NOT NULL,
                location TEXT NOT NULL,
                dependency TEXT NOT NULL,
                version_constraint TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (package_id, location, dependency)
            );
            CREATE TABLE IF NOT EXISTS conflicts (
                package_id TEXT NOT NULL,
                location TEXT NOT NULL,
                dependency TEXT NOT NULL,
                version_constraint TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (package_id, location, dependency)
            );
            ",
        )?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, IndexError> {
        self.conn.lock().map_err(|e| IndexError::Lock(e.to_string()))
    }

    /// Look up one revision as served by `location`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on database failure.
    pub fn get(
        &self,
        id: &PackageId,
        location: &Location,
    ) -> Result<Option<PackageRecord>, IndexError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {PACKAGE_COLUMNS} FROM packages WHERE id = ?1 AND location = ?2"
                ),
                params![id.as_str(), location.as_str()],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Every known revision answering to `name`, ordered by location then id.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on database failure.
    pub fn candidates(&self, name: &PackageName) -> Result<Vec<PackageRecord>, IndexError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PACKAGE_COLUMNS} FROM packages
             WHERE alias = ?1 OR name = ?1
             ORDER BY location, id"
        ))?;
        let rows = stmt.query_map(params![name.as_str()], record_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Edges of one kind declared by `id` as served by `location`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on database failure.
    pub fn edges(
        &self,
        id: &PackageId,
        location: &Location,
        kind: DependencyKind,
    ) -> Result<Vec<DependencyEdge>, IndexError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT dependency, version_constraint FROM {}
             WHERE package_id = ?1 AND location = ?2
             ORDER BY dependency",
            edge_table(kind)
        ))?;
        let rows = stmt.query_map(params![id.as_str(), location.as_str()], |row| {
            let name: String = row.get(0)?;
            let constraint: String = row.get(1)?;
            Ok(DependencyEdge {
                package_id: id.clone(),
                name: PackageName::new(&name),
                kind,
                constraint: VersionConstraint::parse(&constraint),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Replace everything synced from `location` with `packages`, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidPackage`] if any entry's name, alias or
    /// version is not a plain path component, and [`IndexError`] on
    /// database failure. The previous contents of the location are kept in
    /// either case.
    pub fn replace_location(
        &self,
        location: &Location,
        packages: Vec<SourcePackage>,
    ) -> Result<usize, IndexError> {
        if let Some((package, field)) = packages
            .iter()
            .find_map(|p| p.unsafe_field().map(|field| (p, field)))
        {
            return Err(IndexError::InvalidPackage {
                name: package.name.to_string(),
                field,
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for kind in DependencyKind::ALL {
            tx.execute(
                &format!("DELETE FROM {} WHERE location = ?1", edge_table(kind)),
                params![location.as_str()],
            )?;
        }
        tx.execute(
            "DELETE FROM packages WHERE location = ?1",
            params![location.as_str()],
        )?;

        let mut count = 0;
        for package in packages {
            let (record, edges) = package.into_record(location);
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO packages ({PACKAGE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    record.id.as_str(),
                    record.name.as_str(),
                    record.alias.as_str(),
                    record.version,
                    record.serial as i64,
                    record.maintainer,
                    record.verified,
                    record.description,
                    record.uploaded_at,
                    record.location.as_str(),
                    record.checksum.as_str(),
                    record.signature,
                    record.size as i64,
                ],
            )?;
            for edge in &edges {
                tx.execute(
                    &format!(
                        "INSERT OR REPLACE INTO {}
                         (package_id, location, dependency, version_constraint)
                         VALUES (?1, ?2, ?3, ?4)",
                        edge_table(edge.kind)
                    ),
                    params![
                        edge.package_id.as_str(),
                        location.as_str(),
                        edge.name.as_str(),
                        edge.constraint.to_string()
                    ],
                )?;
            }
            count += 1;
        }

        tx.commit()?;
        debug!(location = %location, count, "replaced index location");
        Ok(count)
    }

    /// Number of known revisions.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on database failure.
    pub fn len(&self) -> Result<usize, IndexError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether the index holds no packages.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] on database failure.
    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PackageRecord> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let alias: String = row.get(2)?;
    let serial: i64 = row.get(4)?;
    let location: String = row.get(9)?;
    let checksum: String = row.get(10)?;
    let size: i64 = row.get(12)?;
    Ok(PackageRecord {
        name: PackageName::new(&name),
        alias: PackageName::new(&alias),
        id: PackageId::from_raw(id),
        version: row.get(3)?,
        serial: serial as u64,
        maintainer: row.get(5)?,
        verified: row.get(6)?,
        description: row.get(7)?,
        uploaded_at: row.get(8)?,
        location: Location::from_raw(location),
        checksum: Sha256Hash::new(checksum),
        signature: row.get(11)?,
        size: size as u64,
    })
}
