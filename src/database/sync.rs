// src/database/sync.rs

//! Sync database tarball reader
//!
//! A sync database is a compressed tarball with one directory per package
//! (`bash-5.2.037-1/`), each holding a `desc` file in the `%FIELD%` format
//! and, in older layouts, separate `depends` and `files` files.

use crate::error::{Error, ErrorCode, Result};
use crate::package::pkgfile::open_archive;
use crate::package::{Depend, PackageFile, PackageRecord};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

type DescFields = HashMap<String, Vec<String>>;

/// Parse a `%FIELD%`-delimited file into field → values
fn parse_desc_file(content: &str) -> DescFields {
    let mut fields = HashMap::new();
    let mut current_field: Option<String> = None;
    let mut values: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();

        if trimmed.len() > 2 && trimmed.starts_with('%') && trimmed.ends_with('%') {
            if let Some(field) = current_field.take() {
                fields.insert(field, std::mem::take(&mut values));
            }
            current_field = Some(trimmed[1..trimmed.len() - 1].to_string());
        } else if !trimmed.is_empty() {
            values.push(trimmed.to_string());
        }
    }

    if let Some(field) = current_field {
        fields.insert(field, values);
    }

    fields
}

fn first(fields: &DescFields, key: &str) -> Option<String> {
    fields.get(key).and_then(|v| v.first()).cloned()
}

fn list(fields: &DescFields, key: &str) -> Vec<String> {
    fields.get(key).cloned().unwrap_or_default()
}

fn depends(fields: &DescFields, key: &str) -> Vec<Depend> {
    fields
        .get(key)
        .map(|v| v.iter().map(|d| Depend::parse(d)).collect())
        .unwrap_or_default()
}

/// Build a record from the merged fields of one package directory
fn record_from_fields(dir: &str, fields: &DescFields) -> Result<PackageRecord> {
    let missing = |field: &str| {
        Error::db(
            ErrorCode::DbInvalid,
            format!("{}: missing %{}% field", dir, field),
        )
    };

    let name = first(fields, "NAME").ok_or_else(|| missing("NAME"))?;
    let version = first(fields, "VERSION").ok_or_else(|| missing("VERSION"))?;

    let files = list(fields, "FILES")
        .into_iter()
        .filter(|path| !path.ends_with('/'))
        .map(|path| PackageFile {
            path,
            size: 0,
            mode: 0o644,
            sha256: None,
            link_target: None,
        })
        .collect();

    Ok(PackageRecord {
        filename: first(fields, "FILENAME"),
        name,
        version,
        description: first(fields, "DESC"),
        url: first(fields, "URL"),
        packager: first(fields, "PACKAGER"),
        arch: first(fields, "ARCH"),
        md5sum: first(fields, "MD5SUM"),
        sha256sum: first(fields, "SHA256SUM"),
        size: first(fields, "CSIZE").and_then(|s| s.parse().ok()).unwrap_or(0),
        installed_size: first(fields, "ISIZE").and_then(|s| s.parse().ok()).unwrap_or(0),
        build_date: first(fields, "BUILDDATE").and_then(|s| s.parse().ok()),
        licenses: list(fields, "LICENSE"),
        groups: list(fields, "GROUPS"),
        depends: depends(fields, "DEPENDS"),
        optdepends: depends(fields, "OPTDEPENDS"),
        conflicts: depends(fields, "CONFLICTS"),
        provides: depends(fields, "PROVIDES"),
        replaces: depends(fields, "REPLACES"),
        backup: list(fields, "BACKUP"),
        files,
        ..PackageRecord::default()
    })
}

/// Read every package record from a sync database tarball
pub(crate) fn read_sync_db(path: &Path) -> Result<Vec<PackageRecord>> {
    debug!("Reading sync database: {}", path.display());

    let invalid = |message: String| {
        Error::db(
            ErrorCode::DbInvalid,
            format!("{}: {}", path.display(), message),
        )
    };

    let mut archive = open_archive(path).map_err(|e| invalid(e.to_string()))?;

    // Fields of desc, depends and files merged per package directory
    let mut dirs: BTreeMap<String, DescFields> = BTreeMap::new();

    let entries = archive
        .entries()
        .map_err(|e| invalid(format!("failed to read archive: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| invalid(format!("failed to read entry: {}", e)))?;
        let entry_path = entry
            .path()
            .map_err(|e| invalid(format!("invalid entry path: {}", e)))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();

        let Some((dir, file)) = entry_path.split_once('/') else {
            continue;
        };
        if !matches!(file, "desc" | "depends" | "files") {
            continue;
        }
        let dir = dir.to_string();

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| invalid(format!("failed to read {}: {}", entry_path, e)))?;

        dirs.entry(dir).or_default().extend(parse_desc_file(&content));
    }

    let records = dirs
        .iter()
        .map(|(dir, fields)| record_from_fields(dir, fields))
        .collect::<Result<Vec<_>>>()?;

    info!("Parsed {} packages from {}", records.len(), path.display());
    Ok(records)
}
