// src/transaction/commit.rs

//! Applying a prepared transaction
//!
//! Removals run before installs. Each package is written to the local store
//! inside its own SQLite transaction once its files are in place, so an
//! interrupted commit leaves the store consistent with the packages that
//! finished.

use super::deploy::Deployer;
use crate::error::{Error, ErrorCode, Result};
use crate::flags::TransFlags;
use crate::handle::Handle;
use crate::logging::LogLevel;
use crate::package::pkgfile::{self, ExtractedFile, sha256_hex};
use crate::package::{InstallReason, Package, PackageOrigin, PackageRecord};
use crate::signature;
use crate::store;
use crate::store::models::{FileEntry, InstalledPackage};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

fn commit_error(pkg: Option<&str>, code: ErrorCode, message: impl Into<String>) -> Error {
    Error::Commit {
        code,
        package: pkg.map(str::to_string),
        message: message.into(),
    }
}

/// Attach the package name to a lower-level error
fn in_package(pkg: &str) -> impl Fn(Error) -> Error + '_ {
    move |err| match err {
        Error::Commit { .. } => err,
        other => commit_error(Some(pkg), other.code(), other.to_string()),
    }
}

pub(super) fn apply(
    handle: &Handle,
    flags: TransFlags,
    added: &[Package<'_>],
    removed: &[Package<'_>],
) -> Result<()> {
    let archives = added
        .iter()
        .map(|pkg| locate(handle, pkg))
        .collect::<Result<Vec<_>>>()?;

    if flags.contains(TransFlags::DOWNLOAD_ONLY) {
        handle.log(
            LogLevel::Debug,
            &format!("{} package file(s) available, stopping before install", archives.len()),
        );
        return Ok(());
    }

    let mut contents = Vec::with_capacity(added.len());
    for (pkg, archive) in added.iter().zip(&archives) {
        contents.push(pkgfile::extract_files(archive).map_err(in_package(pkg.name()))?);
    }

    let deployer = Deployer::new(handle.root());
    if !flags.contains(TransFlags::DB_ONLY) {
        check_file_conflicts(handle, &deployer, flags, added, removed, &contents)?;
    }

    for pkg in removed {
        handle.log(LogLevel::Debug, &format!("removing {}", pkg));
        remove_package(handle, &deployer, flags, pkg).map_err(in_package(pkg.name()))?;
        info!("Removed {}", pkg);
    }

    for ((pkg, archive), files) in added.iter().zip(&archives).zip(contents) {
        handle.log(LogLevel::Debug, &format!("installing {}", pkg));
        install_package(handle, &deployer, flags, pkg, archive, files).map_err(in_package(pkg.name()))?;
        info!("Installed {}", pkg);
    }

    Ok(())
}

/// Find the archive of a staged package and check it
///
/// Package files loaded directly were checked when they were loaded. Sync
/// packages are looked up by file name in the cache directories and checked
/// against the database's checksum and signature level.
fn locate(handle: &Handle, pkg: &Package<'_>) -> Result<PathBuf> {
    let db = match pkg.origin() {
        PackageOrigin::Owned(path) => return Ok(path.clone()),
        PackageOrigin::Borrowed(db) => db,
    };

    let filename = pkg.filename().ok_or_else(|| {
        commit_error(Some(pkg.name()), ErrorCode::PkgInvalid, "package has no file name")
    })?;

    let path = handle
        .cache_dirs()
        .iter()
        .map(|dir| dir.join(filename))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            commit_error(
                Some(pkg.name()),
                ErrorCode::Retrieve,
                format!("{} not found in any cache directory", filename),
            )
        })?;
    debug!("Using cached package file {}", path.display());

    if let Some(expected) = pkg.sha256sum() {
        let data = fs::read(&path)
            .map_err(|e| commit_error(Some(pkg.name()), ErrorCode::PkgOpen, format!("{}: {}", path.display(), e)))?;
        let actual = sha256_hex(&data);
        if actual != expected {
            return Err(commit_error(
                Some(pkg.name()),
                ErrorCode::PkgInvalidChecksum,
                format!("{}: checksum mismatch (expected {}, got {})", filename, expected, actual),
            ));
        }
    }

    signature::check_file(&path, db.siglevel().for_packages(), handle.keyring_dir())
        .map_err(|failure| commit_error(Some(pkg.name()), failure.code, failure.message))?;

    Ok(path)
}

fn check_file_conflicts(
    handle: &Handle,
    deployer: &Deployer,
    flags: TransFlags,
    added: &[Package<'_>],
    removed: &[Package<'_>],
    contents: &[Vec<ExtractedFile>],
) -> Result<()> {
    let leaving: HashSet<&str> = removed
        .iter()
        .chain(added)
        .map(|pkg| pkg.name())
        .collect();

    let mut claimed: HashMap<&str, &str> = HashMap::new();
    let mut conflicts = Vec::new();
    let conn = handle.connection();

    for (pkg, files) in added.iter().zip(contents) {
        for file in files {
            if let Some(other) = claimed.insert(file.path.as_str(), pkg.name()) {
                conflicts.push(format!("{} exists in both '{}' and '{}'", file.path, other, pkg.name()));
                continue;
            }

            match FileEntry::find_owner(&conn, &file.path)? {
                Some(owner) if leaving.contains(owner.as_str()) => {}
                Some(owner) => {
                    conflicts.push(format!("{}: {} exists in filesystem (owned by {})", pkg.name(), file.path, owner));
                }
                None if !flags.contains(TransFlags::FORCE) && deployer.occupied(&file.path)? => {
                    conflicts.push(format!("{}: {} exists in filesystem", pkg.name(), file.path));
                }
                None => {}
            }
        }
    }

    if conflicts.is_empty() {
        return Ok(());
    }
    for conflict in &conflicts {
        handle.log(LogLevel::Warning, conflict);
    }
    Err(commit_error(
        None,
        ErrorCode::FileConflicts,
        format!("{} conflicting file(s)", conflicts.len()),
    ))
}

fn remove_package(handle: &Handle, deployer: &Deployer, flags: TransFlags, pkg: &Package<'_>) -> Result<()> {
    if !flags.contains(TransFlags::DB_ONLY) {
        for file in pkg.files() {
            let is_backup = pkg.backup().iter().any(|b| *b == file.path);
            if is_backup && !flags.contains(TransFlags::NO_SAVE) {
                let current = deployer.file_hash(&file.path)?;
                if current.is_some() && current != file.sha256 {
                    let saved = deployer.rename_with_suffix(&file.path, ".pacsave")?;
                    handle.log(LogLevel::Warning, &format!("{} saved as {}", file.path, saved));
                    continue;
                }
            }
            deployer.remove_file(&file.path)?;
        }
        for file in pkg.files() {
            deployer.prune_dirs(&file.path)?;
        }
    }

    let mut conn = handle.connection_mut();
    store::transaction(&mut conn, |tx| InstalledPackage::delete_by_name(tx, pkg.name()))?;
    Ok(())
}

/// What to do with a backup file that already exists on disk
#[derive(Debug, PartialEq, Eq)]
enum BackupAction {
    Overwrite,
    KeepLocal,
    InstallNew,
}

/// Compare the file on disk with the old and new package versions
fn backup_action(on_disk: &str, original: Option<&str>, incoming: &str) -> BackupAction {
    if on_disk == incoming {
        BackupAction::Overwrite
    } else if original == Some(incoming) {
        // The package did not change it, the user did
        BackupAction::KeepLocal
    } else if original == Some(on_disk) {
        BackupAction::Overwrite
    } else {
        BackupAction::InstallNew
    }
}

fn install_package(
    handle: &Handle,
    deployer: &Deployer,
    flags: TransFlags,
    pkg: &Package<'_>,
    archive: &std::path::Path,
    files: Vec<ExtractedFile>,
) -> Result<()> {
    let previous = InstalledPackage::find_by_name(&handle.connection(), pkg.name())?;
    let mut record = pkgfile::read_package(archive, true)?;

    let hashes: HashMap<&str, &str> = files
        .iter()
        .filter(|f| f.link_target.is_none())
        .map(|f| (f.path.as_str(), f.sha256.as_str()))
        .collect();
    for entry in &mut record.files {
        entry.sha256 = hashes.get(entry.path.as_str()).map(|h| h.to_string());
    }

    if !flags.contains(TransFlags::DB_ONLY) {
        deploy_files(handle, deployer, &record, previous.as_ref().map(|p| &p.record), &files)?;

        if let Some(old) = &previous {
            let current: HashSet<&str> = record.files.iter().map(|f| f.path.as_str()).collect();
            let stale: Vec<&str> = old
                .record
                .files
                .iter()
                .map(|f| f.path.as_str())
                .filter(|path| !current.contains(path))
                .collect();
            for path in &stale {
                deployer.remove_file(path)?;
            }
            for path in &stale {
                deployer.prune_dirs(path)?;
            }
        }
    }

    record.reason = if flags.contains(TransFlags::ALL_DEPS) {
        InstallReason::Depend
    } else if flags.contains(TransFlags::ALL_EXPLICIT) {
        InstallReason::Explicit
    } else if let Some(old) = &previous {
        old.record.reason
    } else {
        pkg.reason()
    };
    record.install_date = Some(chrono::Utc::now().timestamp());

    let mut conn = handle.connection_mut();
    store::transaction(&mut conn, |tx| {
        InstalledPackage::delete_by_name(tx, &record.name)?;
        InstalledPackage::new(record.clone()).insert(tx)
    })?;
    Ok(())
}

fn deploy_files(
    handle: &Handle,
    deployer: &Deployer,
    record: &PackageRecord,
    previous: Option<&PackageRecord>,
    files: &[ExtractedFile],
) -> Result<()> {
    for file in files {
        if let Some(link_target) = &file.link_target {
            deployer.write_symlink(&file.path, link_target)?;
            continue;
        }

        if record.backup.iter().any(|b| *b == file.path) {
            if let Some(on_disk) = deployer.file_hash(&file.path)? {
                let original = previous
                    .and_then(|old| old.files.iter().find(|f| f.path == file.path))
                    .and_then(|f| f.sha256.as_deref());

                match backup_action(&on_disk, original, &file.sha256) {
                    BackupAction::Overwrite => {}
                    BackupAction::KeepLocal => {
                        debug!("Keeping locally modified {}", file.path);
                        continue;
                    }
                    BackupAction::InstallNew => {
                        let path = format!("{}.pacnew", file.path);
                        deployer.write_file(&path, &file.content, file.mode)?;
                        handle.log(LogLevel::Warning, &format!("{} installed as {}", file.path, path));
                        continue;
                    }
                }
            }
        }

        deployer.write_file(&file.path, &file.content, file.mode)?;
    }
    Ok(())
}
