// src/config.rs

//! Handle configuration

use crate::flags::SigLevel;
use std::path::PathBuf;

pub const DEFAULT_ROOT: &str = "/";
pub const DEFAULT_DBPATH: &str = "/var/lib/pacman";
pub const DEFAULT_GPGDIR: &str = "/etc/pacman.d/gnupg";
pub const DEFAULT_CACHEDIR: &str = "/var/cache/pacman/pkg";

/// Options for [`Handle::with_options`](crate::Handle::with_options)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOptions {
    /// Filesystem root packages are installed under
    pub root: PathBuf,
    /// Directory holding the local store, sync databases and the lock file
    pub dbpath: PathBuf,
    /// Keyring directory used for signature checks
    pub gpgdir: PathBuf,
    /// Directories searched for package files of sync packages
    pub cache_dirs: Vec<PathBuf>,
    /// Architecture packages must match ("any" always matches)
    pub arch: String,
    /// Signature level applied where `USE_DEFAULT` is given
    pub default_siglevel: SigLevel,
}

impl HandleOptions {
    /// Defaults with a different root and database path
    pub fn new(root: impl Into<PathBuf>, dbpath: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dbpath: dbpath.into(),
            ..Self::default()
        }
    }
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            dbpath: PathBuf::from(DEFAULT_DBPATH),
            gpgdir: PathBuf::from(DEFAULT_GPGDIR),
            cache_dirs: vec![PathBuf::from(DEFAULT_CACHEDIR)],
            arch: std::env::consts::ARCH.to_string(),
            default_siglevel: SigLevel::PACKAGE
                | SigLevel::PACKAGE_OPTIONAL
                | SigLevel::DATABASE
                | SigLevel::DATABASE_OPTIONAL,
        }
    }
}
