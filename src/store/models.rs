// src/store/models.rs

//! Rows of the local store
//!
//! Installed packages map onto the `packages` table, with list fields
//! (dependencies, licenses, backup paths, ...) serialized as JSON. The files
//! each package owns live in the `files` table.

use crate::error::{Error, ErrorCode, Result};
use crate::package::{InstallReason, PackageFile, PackageRecord};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use serde::de::DeserializeOwned;

const PACKAGE_COLUMNS: &str = "id, name, version, filename, description, url, packager, arch, \
     md5sum, sha256sum, size, installed_size, build_date, install_date, reason, licenses, \
     groups, depends, optdepends, conflicts, provides, replaces, backup";

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::db(ErrorCode::DbWrite, format!("failed to serialize column: {}", e)))
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// An installed package as stored in the `packages` table
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    pub id: Option<i64>,
    pub record: PackageRecord,
}

impl InstalledPackage {
    pub fn new(record: PackageRecord) -> Self {
        Self { id: None, record }
    }

    /// Insert this package and its file list
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        let r = &self.record;
        conn.execute(
            "INSERT INTO packages (name, version, filename, description, url, packager, arch,
                 md5sum, sha256sum, size, installed_size, build_date, install_date, reason,
                 licenses, groups, depends, optdepends, conflicts, provides, replaces, backup)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21, ?22)",
            params![
                &r.name,
                &r.version,
                &r.filename,
                &r.description,
                &r.url,
                &r.packager,
                &r.arch,
                &r.md5sum,
                &r.sha256sum,
                r.size as i64,
                r.installed_size as i64,
                &r.build_date,
                &r.install_date,
                r.reason.as_str(),
                to_json(&r.licenses)?,
                to_json(&r.groups)?,
                to_json(&r.depends)?,
                to_json(&r.optdepends)?,
                to_json(&r.conflicts)?,
                to_json(&r.provides)?,
                to_json(&r.replaces)?,
                to_json(&r.backup)?,
            ],
        )?;

        let id = conn.last_insert_rowid();
        for file in &r.files {
            FileEntry::from_package_file(id, file).insert(conn)?;
        }

        self.id = Some(id);
        Ok(id)
    }

    /// Find an installed package by exact name, including its files
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages WHERE name = ?1",
            PACKAGE_COLUMNS
        ))?;

        match stmt.query_row([name], Self::from_row).optional()? {
            Some(pkg) => Ok(Some(pkg.with_files(conn)?)),
            None => Ok(None),
        }
    }

    /// List every installed package, including files, ordered by name
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM packages ORDER BY name",
            PACKAGE_COLUMNS
        ))?;

        let packages = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        packages.into_iter().map(|p| p.with_files(conn)).collect()
    }

    /// Delete a package by name; its files go with it
    pub fn delete_by_name(conn: &Connection, name: &str) -> Result<bool> {
        let deleted = conn.execute("DELETE FROM packages WHERE name = ?1", [name])?;
        Ok(deleted > 0)
    }

    fn with_files(mut self, conn: &Connection) -> Result<Self> {
        if let Some(id) = self.id {
            self.record.files = FileEntry::find_by_package(conn, id)?
                .into_iter()
                .map(FileEntry::into_package_file)
                .collect();
        }
        Ok(self)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let reason_str: String = row.get(14)?;
        let reason = reason_str.parse::<InstallReason>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                14,
                Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            record: PackageRecord {
                name: row.get(1)?,
                version: row.get(2)?,
                filename: row.get(3)?,
                description: row.get(4)?,
                url: row.get(5)?,
                packager: row.get(6)?,
                arch: row.get(7)?,
                md5sum: row.get(8)?,
                sha256sum: row.get(9)?,
                size: row.get::<_, i64>(10)? as u64,
                installed_size: row.get::<_, i64>(11)? as u64,
                build_date: row.get(12)?,
                install_date: row.get(13)?,
                reason,
                licenses: json_column(row, 15)?,
                groups: json_column(row, 16)?,
                depends: json_column(row, 17)?,
                optdepends: json_column(row, 18)?,
                conflicts: json_column(row, 19)?,
                provides: json_column(row, 20)?,
                replaces: json_column(row, 21)?,
                backup: json_column(row, 22)?,
                files: Vec::new(),
            },
        })
    }
}

/// A file owned by an installed package
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: Option<i64>,
    pub package_id: i64,
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub sha256: Option<String>,
    pub link_target: Option<String>,
}

impl FileEntry {
    fn from_package_file(package_id: i64, file: &PackageFile) -> Self {
        Self {
            id: None,
            package_id,
            path: file.path.clone(),
            size: file.size,
            mode: file.mode,
            sha256: file.sha256.clone(),
            link_target: file.link_target.clone(),
        }
    }

    fn into_package_file(self) -> PackageFile {
        PackageFile {
            path: self.path,
            size: self.size,
            mode: self.mode,
            sha256: self.sha256,
            link_target: self.link_target,
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO files (package_id, path, size, mode, sha256, link_target)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.package_id,
                &self.path,
                self.size as i64,
                self.mode,
                &self.sha256,
                &self.link_target,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_package(conn: &Connection, package_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, package_id, path, size, mode, sha256, link_target
             FROM files WHERE package_id = ?1 ORDER BY path",
        )?;

        let files = stmt
            .query_map([package_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(files)
    }

    /// Name of the installed package owning `path`, if any
    pub fn find_owner(conn: &Connection, path: &str) -> Result<Option<String>> {
        let owner = conn
            .query_row(
                "SELECT p.name FROM files f JOIN packages p ON p.id = f.package_id
                 WHERE f.path = ?1 LIMIT 1",
                [path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            package_id: row.get(1)?,
            path: row.get(2)?,
            size: row.get::<_, i64>(3)? as u64,
            mode: row.get(4)?,
            sha256: row.get(5)?,
            link_target: row.get(6)?,
        })
    }
}
