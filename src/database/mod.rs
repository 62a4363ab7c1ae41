// src/database/mod.rs

//! Package databases
//!
//! Every handle has one local database (the installed packages, kept in the
//! local store) and any number of registered sync databases (repository
//! tarballs under `<dbpath>/sync/`). A [`Database`] value is a cheap handle
//! onto the registry entry; unregistering flags the entry so that every
//! other copy fails fast afterwards.

pub(crate) mod sync;

use crate::error::{Error, ErrorCode, Result};
use crate::flags::SigLevel;
use crate::handle::Handle;
use crate::package::{Package, PackageRecord};
use crate::signature::{self, SigFailure};
use crate::store::models::InstalledPackage;
use regex::{Regex, RegexBuilder};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;

/// Name under which the local database is known
pub const LOCAL_DB_NAME: &str = "local";

/// Kind of database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Local,
    Sync,
}

type Records = Rc<Vec<Rc<PackageRecord>>>;

/// Registry entry shared by every `Database` value of one database
pub(crate) struct DbInner {
    name: String,
    kind: DbKind,
    siglevel: SigLevel,
    servers: RefCell<Vec<String>>,
    registered: Cell<bool>,
    cache: RefCell<Option<Records>>,
}

impl DbInner {
    pub(crate) fn new(name: &str, kind: DbKind, siglevel: SigLevel) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            kind,
            siglevel,
            servers: RefCell::new(Vec::new()),
            registered: Cell::new(true),
            cache: RefCell::new(None),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn invalidate(&self) {
        self.cache.borrow_mut().take();
    }

    pub(crate) fn mark_unregistered(&self) {
        self.registered.set(false);
        self.invalidate();
    }
}

/// A local or sync package database of a [`Handle`]
#[derive(Clone)]
pub struct Database<'h> {
    handle: &'h Handle,
    inner: Rc<DbInner>,
}

impl<'h> Database<'h> {
    pub(crate) fn new(handle: &'h Handle, inner: Rc<DbInner>) -> Self {
        Self { handle, inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> DbKind {
        self.inner.kind
    }

    pub fn is_local(&self) -> bool {
        self.inner.kind == DbKind::Local
    }

    pub fn handle(&self) -> &'h Handle {
        self.handle
    }

    /// Signature level with `USE_DEFAULT` resolved against the handle
    pub fn siglevel(&self) -> SigLevel {
        self.inner.siglevel.resolve(self.handle.default_siglevel())
    }

    /// Whether this database is still registered with its handle
    pub fn is_registered(&self) -> bool {
        self.inner.registered.get()
    }

    /// Path of the sync database tarball
    pub fn path(&self) -> Option<PathBuf> {
        match self.inner.kind {
            DbKind::Local => None,
            DbKind::Sync => Some(
                self.handle
                    .dbpath()
                    .join("sync")
                    .join(format!("{}.db", self.inner.name)),
            ),
        }
    }

    fn ensure_registered(&self) -> Result<()> {
        if self.inner.registered.get() {
            Ok(())
        } else {
            Err(Error::db(
                ErrorCode::DbNotFound,
                format!("database '{}' is no longer registered", self.inner.name),
            ))
        }
    }

    /// Package records, loaded on first use
    fn records(&self) -> Result<Records> {
        self.ensure_registered()?;

        if let Some(records) = self.inner.cache.borrow().as_ref() {
            return Ok(Rc::clone(records));
        }

        let mut loaded = match self.inner.kind {
            DbKind::Local => {
                let conn = self.handle.connection();
                InstalledPackage::list_all(&conn)?
                    .into_iter()
                    .map(|p| p.record)
                    .collect::<Vec<_>>()
            }
            DbKind::Sync => self.load_sync_records()?,
        };
        loaded.sort_by(|a, b| a.name.cmp(&b.name));

        debug!("Loaded {} package(s) from database '{}'", loaded.len(), self.inner.name);
        let records: Records = Rc::new(loaded.into_iter().map(Rc::new).collect());
        *self.inner.cache.borrow_mut() = Some(Rc::clone(&records));
        Ok(records)
    }

    fn load_sync_records(&self) -> Result<Vec<PackageRecord>> {
        let Some(path) = self.path() else {
            return Ok(Vec::new());
        };

        if !path.exists() {
            return Err(Error::db(
                ErrorCode::DbNotFound,
                format!("database file for '{}' does not exist", self.inner.name),
            ));
        }

        signature::check_file(&path, self.siglevel().for_databases(), self.handle.keyring_dir())
            .map_err(|failure| {
                Error::db(
                    signature_code(&failure),
                    format!("{}: {}", self.inner.name, failure.message),
                )
            })?;

        sync::read_sync_db(&path)
    }

    fn package(&self, record: &Rc<PackageRecord>) -> Package<'h> {
        Package::borrowed(self.clone(), Rc::clone(record))
    }

    /// Every package of this database, sorted by name
    pub fn packages(&self) -> Result<Vec<Package<'h>>> {
        let records = self.handle.check(self.records())?;
        Ok(records.iter().map(|r| self.package(r)).collect())
    }

    /// Find a package by exact name
    ///
    /// A miss is not an error: it returns `Ok(None)` and records
    /// `PkgNotFound` as the handle's last error.
    pub fn lookup(&self, name: &str) -> Result<Option<Package<'h>>> {
        let records = self.handle.check(self.records())?;

        match records.iter().find(|r| r.name == name) {
            Some(record) => Ok(Some(self.package(record))),
            None => {
                debug!("Package '{}' not found in database '{}'", name, self.inner.name);
                self.handle.set_last_error(ErrorCode::PkgNotFound);
                Ok(None)
            }
        }
    }

    /// Find packages matching every term
    ///
    /// Each term is a case-insensitive regular expression matched against the
    /// package name, description and provided names; a package is returned
    /// when all terms match one of them.
    pub fn search<S: AsRef<str>>(&self, terms: &[S]) -> Result<Vec<Package<'h>>> {
        let patterns = terms
            .iter()
            .map(|term| {
                RegexBuilder::new(term.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::db(ErrorCode::InvalidRegex, e.to_string()))
            })
            .collect::<Result<Vec<Regex>>>();
        let patterns = self.handle.check(patterns)?;
        let records = self.handle.check(self.records())?;

        Ok(records
            .iter()
            .filter(|record| patterns.iter().all(|re| matches_record(re, record)))
            .map(|record| self.package(record))
            .collect())
    }

    /// Snapshot of the configured server URLs
    pub fn servers(&self) -> Result<Vec<String>> {
        self.handle.check(self.ensure_registered())?;
        Ok(self.inner.servers.borrow().clone())
    }

    /// Replace the whole server list
    ///
    /// Every URL is validated before anything is replaced.
    pub fn set_servers<I, S>(&self, servers: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let validated = servers
            .into_iter()
            .map(|url| normalize_server(url.as_ref()))
            .collect::<Result<Vec<_>>>();
        let validated = self.handle.check(self.ensure_sync().and(validated))?;

        debug!("Setting {} server(s) for '{}'", validated.len(), self.inner.name);
        *self.inner.servers.borrow_mut() = validated;
        Ok(())
    }

    /// Append one server URL
    pub fn add_server(&self, url: &str) -> Result<()> {
        let url = self.handle.check(self.ensure_sync().and(normalize_server(url)))?;
        self.inner.servers.borrow_mut().push(url);
        Ok(())
    }

    /// Remove one server URL; returns whether it was present
    pub fn remove_server(&self, url: &str) -> Result<bool> {
        let url = self.handle.check(self.ensure_sync().and(normalize_server(url)))?;
        let mut servers = self.inner.servers.borrow_mut();
        let before = servers.len();
        servers.retain(|s| *s != url);
        Ok(servers.len() != before)
    }

    fn ensure_sync(&self) -> Result<()> {
        self.ensure_registered()?;
        match self.inner.kind {
            DbKind::Sync => Ok(()),
            DbKind::Local => Err(Error::db(
                ErrorCode::WrongArgs,
                "the local database has no servers",
            )),
        }
    }

    /// Whether the database passes its signature level
    ///
    /// The local database is always valid. `false` is not an error: the
    /// reason is recorded as the handle's last error.
    pub fn is_valid(&self) -> Result<bool> {
        self.handle.check(self.ensure_registered())?;

        let Some(path) = self.path() else {
            return Ok(true);
        };

        if !path.exists() {
            debug!("Database file {} is missing", path.display());
            self.handle.set_last_error(ErrorCode::DbNotFound);
            return Ok(false);
        }

        match signature::check_file(&path, self.siglevel().for_databases(), self.handle.keyring_dir()) {
            Ok(()) => Ok(true),
            Err(failure) => {
                debug!("Database '{}' failed signature check: {}", self.inner.name, failure.message);
                self.handle.set_last_error(signature_code(&failure));
                Ok(false)
            }
        }
    }

    /// Remove this sync database from the handle's registry
    pub fn unregister(self) -> Result<()> {
        if self.inner.kind == DbKind::Local {
            return self.handle.fail(Error::db(
                ErrorCode::WrongArgs,
                "the local database cannot be unregistered",
            ));
        }
        self.handle.check(self.ensure_registered())?;

        self.handle.remove_sync_database(&self.inner);
        Ok(())
    }
}

impl fmt::Debug for Database<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("registered", &self.inner.registered.get())
            .finish()
    }
}

fn matches_record(re: &Regex, record: &PackageRecord) -> bool {
    re.is_match(&record.name)
        || record.description.as_deref().is_some_and(|d| re.is_match(d))
        || record.provides.iter().any(|p| re.is_match(&p.name))
}

fn normalize_server(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::db(
            ErrorCode::ServerBadUrl,
            format!("invalid server url '{}'", url),
        ));
    }
    Ok(trimmed.to_string())
}

/// Error code for a failed database signature check
///
/// A required signature that is absent stays `SigMissing`; anything else
/// marks the database itself as invalid.
fn signature_code(failure: &SigFailure) -> ErrorCode {
    match failure.code {
        ErrorCode::SigMissing => ErrorCode::SigMissing,
        _ => ErrorCode::DbInvalidSig,
    }
}
