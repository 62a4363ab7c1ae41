// src/package/mod.rs

//! Package records
//!
//! A [`Package`] is an immutable view of one package record. It either comes
//! from a [`Database`] (and is bound to the handle that database belongs to)
//! or is owned, when it was loaded from a package file on disk.

mod depend;
pub mod pkgfile;

pub use depend::{DepMod, Depend};

use crate::database::Database;
use std::cmp::Ordering;
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::str::FromStr;

/// Why a package is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallReason {
    #[default]
    Explicit,
    Depend,
}

impl InstallReason {
    pub fn as_str(&self) -> &str {
        match self {
            InstallReason::Explicit => "explicit",
            InstallReason::Depend => "depend",
        }
    }
}

impl FromStr for InstallReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(InstallReason::Explicit),
            "depend" => Ok(InstallReason::Depend),
            _ => Err(format!("Invalid install reason: {}", s)),
        }
    }
}

/// Metadata about a file within a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    /// Path relative to the install root, without leading slash
    pub path: String,
    pub size: u64,
    pub mode: u32,
    pub sha256: Option<String>,
    /// Target of a symbolic link entry
    pub link_target: Option<String>,
}

/// The raw package record shared by every package origin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageRecord {
    pub filename: Option<String>,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub packager: Option<String>,
    pub arch: Option<String>,
    pub md5sum: Option<String>,
    pub sha256sum: Option<String>,
    /// Compressed package size
    pub size: u64,
    pub installed_size: u64,
    pub build_date: Option<i64>,
    pub install_date: Option<i64>,
    pub reason: InstallReason,
    pub licenses: Vec<String>,
    pub groups: Vec<String>,
    pub depends: Vec<Depend>,
    pub optdepends: Vec<Depend>,
    pub conflicts: Vec<Depend>,
    pub provides: Vec<Depend>,
    pub replaces: Vec<Depend>,
    pub backup: Vec<String>,
    pub files: Vec<PackageFile>,
}

impl PackageRecord {
    /// Whether this record satisfies `dep`
    pub(crate) fn satisfies(&self, dep: &Depend, ignore_version: bool) -> bool {
        dep.satisfied_by(&self.name, &self.version, &self.provides, ignore_version)
    }
}

/// Where a package came from
#[derive(Clone)]
pub enum PackageOrigin<'a> {
    /// Looked up from a database of the handle borrowed for `'a`
    Borrowed(Database<'a>),
    /// Loaded from a package file and owned by the caller
    Owned(PathBuf),
}

/// An immutable package record
#[derive(Clone)]
pub struct Package<'a> {
    record: Rc<PackageRecord>,
    origin: PackageOrigin<'a>,
}

impl<'a> Package<'a> {
    pub(crate) fn borrowed(db: Database<'a>, record: Rc<PackageRecord>) -> Self {
        Self {
            record,
            origin: PackageOrigin::Borrowed(db),
        }
    }

    pub(crate) fn owned(path: PathBuf, record: PackageRecord) -> Package<'static> {
        Package {
            record: Rc::new(record),
            origin: PackageOrigin::Owned(path),
        }
    }

    pub(crate) fn record(&self) -> &PackageRecord {
        &self.record
    }

    pub fn origin(&self) -> &PackageOrigin<'a> {
        &self.origin
    }

    /// The database this package was looked up from
    pub fn database(&self) -> Option<&Database<'a>> {
        match &self.origin {
            PackageOrigin::Borrowed(db) => Some(db),
            PackageOrigin::Owned(_) => None,
        }
    }

    /// Path of the package file this package was loaded from
    pub fn file_path(&self) -> Option<&Path> {
        match &self.origin {
            PackageOrigin::Borrowed(_) => None,
            PackageOrigin::Owned(path) => Some(path),
        }
    }

    pub fn filename(&self) -> Option<&str> {
        self.record.filename.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn version(&self) -> &str {
        &self.record.version
    }

    pub fn description(&self) -> Option<&str> {
        self.record.description.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.record.url.as_deref()
    }

    pub fn packager(&self) -> Option<&str> {
        self.record.packager.as_deref()
    }

    pub fn arch(&self) -> Option<&str> {
        self.record.arch.as_deref()
    }

    pub fn md5sum(&self) -> Option<&str> {
        self.record.md5sum.as_deref()
    }

    pub fn sha256sum(&self) -> Option<&str> {
        self.record.sha256sum.as_deref()
    }

    /// Compressed size of the package file
    pub fn size(&self) -> u64 {
        self.record.size
    }

    pub fn installed_size(&self) -> u64 {
        self.record.installed_size
    }

    pub fn build_date(&self) -> Option<i64> {
        self.record.build_date
    }

    pub fn install_date(&self) -> Option<i64> {
        self.record.install_date
    }

    pub fn reason(&self) -> InstallReason {
        self.record.reason
    }

    pub fn licenses(&self) -> &[String] {
        &self.record.licenses
    }

    pub fn groups(&self) -> &[String] {
        &self.record.groups
    }

    pub fn depends(&self) -> &[Depend] {
        &self.record.depends
    }

    pub fn optdepends(&self) -> &[Depend] {
        &self.record.optdepends
    }

    pub fn conflicts(&self) -> &[Depend] {
        &self.record.conflicts
    }

    pub fn provides(&self) -> &[Depend] {
        &self.record.provides
    }

    pub fn replaces(&self) -> &[Depend] {
        &self.record.replaces
    }

    pub fn backup(&self) -> &[String] {
        &self.record.backup
    }

    /// Files owned by this package (empty for metadata-only loads)
    pub fn files(&self) -> &[PackageFile] {
        &self.record.files
    }

    /// Order by name (locale collation), then by version
    ///
    /// Versions are only consulted when the names are equal.
    pub fn compare(&self, other: &Package<'_>) -> Ordering {
        match collate(self.name(), other.name()) {
            Ordering::Equal => crate::version::vercmp(self.version(), other.version()),
            ord => ord,
        }
    }
}

impl fmt::Debug for Package<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match &self.origin {
            PackageOrigin::Borrowed(db) => db.name().to_string(),
            PackageOrigin::Owned(path) => path.display().to_string(),
        };
        f.debug_struct("Package")
            .field("name", &self.record.name)
            .field("version", &self.record.version)
            .field("origin", &origin)
            .finish()
    }
}

impl fmt::Display for Package<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.record.name, self.record.version)
    }
}

/// Compare two names with the process locale's collation
///
/// Falls back to byte order for strings that cannot cross the C boundary.
pub fn collate(a: &str, b: &str) -> Ordering {
    match (CString::new(a), CString::new(b)) {
        (Ok(ca), Ok(cb)) => {
            // SAFETY: both pointers are valid NUL-terminated strings for the call
            let r = unsafe { libc::strcoll(ca.as_ptr(), cb.as_ptr()) };
            r.cmp(&0)
        }
        _ => a.cmp(b),
    }
}
