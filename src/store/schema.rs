// src/store/schema.rs

//! Local store schema and migrations
//!
//! Each schema change is a numbered migration; the applied versions are
//! recorded in the `schema_version` table.

use crate::error::{Error, ErrorCode, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the store
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the store up to date
///
/// A store written by a newer schema is refused with `DbVersion`.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version > SCHEMA_VERSION {
        return Err(Error::init(
            ErrorCode::DbVersion,
            format!(
                "store schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            ),
        ));
    }

    if current_version == SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::init(
            ErrorCode::DbVersion,
            format!("unknown migration version: {}", version),
        )),
    }
}

/// Initial schema - Version 1
///
/// - packages: one row per installed package, list fields stored as JSON
/// - files: files owned by each installed package
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL,
            filename TEXT,
            description TEXT,
            url TEXT,
            packager TEXT,
            arch TEXT,
            md5sum TEXT,
            sha256sum TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            installed_size INTEGER NOT NULL DEFAULT 0,
            build_date INTEGER,
            install_date INTEGER,
            reason TEXT NOT NULL CHECK(reason IN ('explicit', 'depend')),
            licenses TEXT NOT NULL DEFAULT '[]',
            groups TEXT NOT NULL DEFAULT '[]',
            depends TEXT NOT NULL DEFAULT '[]',
            optdepends TEXT NOT NULL DEFAULT '[]',
            conflicts TEXT NOT NULL DEFAULT '[]',
            provides TEXT NOT NULL DEFAULT '[]',
            replaces TEXT NOT NULL DEFAULT '[]',
            backup TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX idx_packages_reason ON packages(reason);

        CREATE TABLE files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            package_id INTEGER NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            mode INTEGER NOT NULL,
            sha256 TEXT,
            FOREIGN KEY (package_id) REFERENCES packages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_files_package_id ON files(package_id);
        CREATE INDEX idx_files_path ON files(path);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: record symlink targets of installed files
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    conn.execute_batch("ALTER TABLE files ADD COLUMN link_target TEXT;")?;

    info!("Schema version 2 applied successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = create_test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = create_test_db();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = create_test_db();
        migrate(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        let err = migrate(&conn).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DbVersion);
    }

    #[test]
    fn test_reason_constraint() {
        let conn = create_test_db();
        migrate(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO packages (name, version, reason) VALUES ('foo', '1.0', 'bogus')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_files_cascade_with_package() {
        let conn = create_test_db();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO packages (name, version, reason) VALUES ('foo', '1.0', 'explicit')",
            [],
        )
        .unwrap();
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO files (package_id, path, mode, link_target) VALUES (?1, 'usr/bin/foo', 493, NULL)",
            [id],
        )
        .unwrap();

        conn.execute("DELETE FROM packages WHERE id = ?1", [id]).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
