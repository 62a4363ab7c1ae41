// src/transaction/deploy.rs

//! Root filesystem operations used while committing
//!
//! Package paths are relative to the install root. Paths that would escape
//! the root are rejected before anything touches the filesystem.

use crate::error::{Error, Result};
use crate::package::pkgfile::sha256_hex;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Writes and removes package files below an install root
pub(super) struct Deployer {
    root: PathBuf,
}

impl Deployer {
    pub(super) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Resolve a package path below the root
    fn target(&self, path: &str) -> Result<PathBuf> {
        let mut normalized = PathBuf::new();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(c) => normalized.push(c),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    warn!("Path traversal attempt detected: {}", path);
                    return Err(escape_error(path));
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty path after normalization",
            )));
        }

        self.check_parents(path, &normalized)?;
        Ok(self.root.join(normalized))
    }

    /// Symlinked parent directories must resolve inside the root
    fn check_parents(&self, path: &str, normalized: &Path) -> Result<()> {
        let Some(parents) = normalized.parent() else {
            return Ok(());
        };

        let mut current = self.root.clone();
        for component in parents.components() {
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let root = fs::canonicalize(&self.root)?;
                    let inside = fs::canonicalize(&current)
                        .is_ok_and(|resolved| resolved.starts_with(&root));
                    if !inside {
                        warn!("Symlinked directory leaves the root: {}", current.display());
                        return Err(escape_error(path));
                    }
                }
                Ok(_) => {}
                // Nothing below a missing directory can be a symlink yet
                Err(_) => break,
            }
        }
        Ok(())
    }

    /// Whether anything other than a directory exists at `path`
    pub(super) fn occupied(&self, path: &str) -> Result<bool> {
        let target = self.target(path)?;
        Ok(fs::symlink_metadata(&target).is_ok_and(|meta| !meta.is_dir()))
    }

    /// Hash of the regular file at `path`, if there is one
    pub(super) fn file_hash(&self, path: &str) -> Result<Option<String>> {
        let target = self.target(path)?;
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_file() => Ok(Some(sha256_hex(&fs::read(&target)?))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn prepare_parent(&self, target: &Path) -> Result<PathBuf> {
        let parent = target.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent)?;
        if fs::symlink_metadata(target).is_ok_and(|meta| !meta.is_dir()) {
            fs::remove_file(target)?;
        }
        Ok(parent)
    }

    /// Atomically write a regular file
    pub(super) fn write_file(&self, path: &str, content: &[u8], mode: u32) -> Result<()> {
        let target = self.target(path)?;
        if target.is_dir() {
            debug!("Skipping file deployment over directory: {}", path);
            return Ok(());
        }
        let parent = self.prepare_parent(&target)?;

        let mut file = NamedTempFile::new_in(&parent)?;
        file.write_all(content)?;
        file.as_file().sync_all()?;
        file.persist(&target).map_err(|e| e.error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))?;
        }

        debug!("Deployed file: {} (mode: {:o})", path, mode);
        Ok(())
    }

    pub(super) fn write_symlink(&self, path: &str, link_target: &Path) -> Result<()> {
        let target = self.target(path)?;
        if target.is_dir() && !target.is_symlink() {
            debug!("Skipping symlink deployment over directory: {}", path);
            return Ok(());
        }
        self.prepare_parent(&target)?;

        #[cfg(unix)]
        std::os::unix::fs::symlink(link_target, &target)?;

        #[cfg(not(unix))]
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "symlinks not supported on this platform",
        )));

        debug!("Deployed symlink: {} -> {}", path, link_target.display());
        Ok(())
    }

    /// Remove a file or symlink; missing files are fine
    pub(super) fn remove_file(&self, path: &str) -> Result<()> {
        let target = self.target(path)?;
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                debug!("Skipping directory in remove_file: {}", path);
                Ok(())
            }
            Ok(_) => {
                fs::remove_file(&target)?;
                debug!("Removed file: {}", path);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("File already removed: {}", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move the file at `path` aside to `path<suffix>`
    pub(super) fn rename_with_suffix(&self, path: &str, suffix: &str) -> Result<String> {
        let renamed = format!("{}{}", path, suffix);
        fs::rename(self.target(path)?, self.target(&renamed)?)?;
        Ok(renamed)
    }

    /// Remove the now-empty parent directories of `path`, up to the root
    pub(super) fn prune_dirs(&self, path: &str) -> Result<()> {
        let target = self.target(path)?;
        let mut dir = target.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            match fs::remove_dir(current) {
                Ok(()) => debug!("Removed directory: {}", current.display()),
                // Not empty, or already gone
                Err(_) => break,
            }
            dir = current.parent();
        }
        Ok(())
    }
}

fn escape_error(path: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("path traversal detected: {}", path),
    ))
}
