// src/handle.rs

//! The session handle
//!
//! A [`Handle`] binds a root filesystem and a database directory. It owns the
//! local store connection, the registry of sync databases, the log sink and
//! the single transaction slot. Databases, packages and transactions borrow
//! the handle, so none of them can outlive it, and [`Handle::close`] consumes
//! it.

use crate::config::HandleOptions;
use crate::database::{Database, DbInner, DbKind, LOCAL_DB_NAME};
use crate::error::{Error, ErrorCode, Result};
use crate::flags::{SigLevel, TransFlags};
use crate::logging::{LogDispatch, LogLevel};
use crate::package::{Package, pkgfile};
use crate::signature;
use crate::store;
use crate::transaction::Transaction;
use rusqlite::Connection;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

/// Name of the lock file inside the database directory
pub const LOCK_FILE: &str = "db.lck";

/// A package management session
pub struct Handle {
    root: PathBuf,
    dbpath: PathBuf,
    gpgdir: PathBuf,
    cache_dirs: Vec<PathBuf>,
    arch: String,
    default_siglevel: SigLevel,
    conn: RefCell<Connection>,
    localdb: Rc<DbInner>,
    syncdbs: RefCell<Vec<Rc<DbInner>>>,
    log: LogDispatch,
    last_error: Cell<Option<ErrorCode>>,
    trans_open: Cell<bool>,
}

impl Handle {
    /// Open a session on `root` with its databases in `dbpath`
    ///
    /// `root` must exist; `dbpath` and the local store are created on demand.
    pub fn open(root: impl AsRef<Path>, dbpath: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(HandleOptions::new(
            root.as_ref().to_path_buf(),
            dbpath.as_ref().to_path_buf(),
        ))
    }

    /// Open a session from a full set of options
    pub fn with_options(options: HandleOptions) -> Result<Self> {
        debug!(
            "Opening handle (root: {}, dbpath: {})",
            options.root.display(),
            options.dbpath.display()
        );

        if !options.root.is_dir() {
            return Err(Error::init(
                ErrorCode::NotADirectory,
                format!("root {} is not a directory", options.root.display()),
            ));
        }

        fs::create_dir_all(&options.dbpath).map_err(|e| {
            Error::init(
                ErrorCode::DbCreate,
                format!("failed to create {}: {}", options.dbpath.display(), e),
            )
        })?;

        let conn = store::open(&options.dbpath.join(store::LOCAL_DB_FILE))?;

        info!("Opened handle on {}", options.root.display());
        Ok(Self {
            root: options.root,
            dbpath: options.dbpath,
            gpgdir: options.gpgdir,
            cache_dirs: options.cache_dirs,
            arch: options.arch,
            default_siglevel: options.default_siglevel,
            conn: RefCell::new(conn),
            localdb: DbInner::new(LOCAL_DB_NAME, DbKind::Local, SigLevel::USE_DEFAULT),
            syncdbs: RefCell::new(Vec::new()),
            log: LogDispatch::default(),
            last_error: Cell::new(None),
            trans_open: Cell::new(false),
        })
    }

    /// Release the session and its storage connection
    pub fn close(self) -> Result<()> {
        debug!("Closing handle on {}", self.root.display());
        for db in self.syncdbs.borrow().iter() {
            db.mark_unregistered();
        }
        self.conn
            .into_inner()
            .close()
            .map_err(|(_, e)| Error::Storage(e))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dbpath(&self) -> &Path {
        &self.dbpath
    }

    /// Path of the lock file guarding the databases
    pub fn lock_file(&self) -> PathBuf {
        self.dbpath.join(LOCK_FILE)
    }

    pub fn architecture(&self) -> &str {
        &self.arch
    }

    pub fn set_architecture(&mut self, arch: impl Into<String>) {
        self.arch = arch.into();
    }

    pub fn keyring_dir(&self) -> &Path {
        &self.gpgdir
    }

    pub fn set_keyring_dir(&mut self, dir: impl Into<PathBuf>) {
        self.gpgdir = dir.into();
    }

    pub fn cache_dirs(&self) -> &[PathBuf] {
        &self.cache_dirs
    }

    pub fn set_cache_dirs<I, P>(&mut self, dirs: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.cache_dirs = dirs.into_iter().map(Into::into).collect();
    }

    pub fn add_cache_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.cache_dirs.contains(&dir) {
            self.cache_dirs.push(dir);
        }
    }

    pub fn default_siglevel(&self) -> SigLevel {
        self.default_siglevel
    }

    /// Set the level used wherever `USE_DEFAULT` is given
    ///
    /// `USE_DEFAULT` itself is not a valid default and is dropped.
    pub fn set_default_siglevel(&mut self, mut level: SigLevel) {
        level.remove(SigLevel::USE_DEFAULT);
        self.default_siglevel = level;
    }

    /// Register a callback receiving engine log messages
    pub fn set_log_sink<F>(&mut self, sink: F)
    where
        F: FnMut(LogLevel, &str) + 'static,
    {
        self.log.set(Box::new(sink));
    }

    pub fn clear_log_sink(&mut self) {
        self.log.clear();
    }

    /// Forward a message with a raw level value through the log pipeline
    ///
    /// Values that are not a known [`LogLevel`] are dropped with a warning.
    pub fn log_raw(&self, level: u32, message: &str) {
        self.log.emit_raw(level, message);
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        self.log.emit(level, message);
    }

    /// Most recent failure recorded on this handle
    ///
    /// `None` only means nothing has failed yet; success of the latest call
    /// cannot be inferred from it.
    pub fn last_error(&self) -> Option<ErrorCode> {
        self.last_error.get()
    }

    pub(crate) fn set_last_error(&self, code: ErrorCode) {
        self.last_error.set(Some(code));
    }

    /// Record `err` as the last error, log it and return it
    pub(crate) fn fail<T>(&self, err: Error) -> Result<T> {
        self.set_last_error(err.code());
        self.log(LogLevel::Error, &err.to_string());
        Err(err)
    }

    /// Pass `result` through, recording its error if any
    pub(crate) fn check<T>(&self, result: Result<T>) -> Result<T> {
        result.or_else(|err| self.fail(err))
    }

    pub(crate) fn connection(&self) -> Ref<'_, Connection> {
        self.conn.borrow()
    }

    pub(crate) fn connection_mut(&self) -> RefMut<'_, Connection> {
        self.conn.borrow_mut()
    }

    /// The database of installed packages
    pub fn local_database(&self) -> Database<'_> {
        Database::new(self, Rc::clone(&self.localdb))
    }

    /// Every registered sync database, in registration order
    pub fn sync_databases(&self) -> Vec<Database<'_>> {
        self.syncdbs
            .borrow()
            .iter()
            .map(|inner| Database::new(self, Rc::clone(inner)))
            .collect()
    }

    /// Register the sync database `name`, backed by `<dbpath>/sync/<name>.db`
    pub fn register_sync_database(&self, name: &str, siglevel: SigLevel) -> Result<Database<'_>> {
        if name.is_empty() || name == LOCAL_DB_NAME || name.contains('/') {
            return self.fail(Error::db(
                ErrorCode::WrongArgs,
                format!("invalid database name '{}'", name),
            ));
        }

        if self.syncdbs.borrow().iter().any(|db| db.name() == name) {
            return self.fail(Error::db(
                ErrorCode::WrongArgs,
                format!("database '{}' is already registered", name),
            ));
        }

        let inner = DbInner::new(name, DbKind::Sync, siglevel);
        self.syncdbs.borrow_mut().push(Rc::clone(&inner));
        debug!("Registered sync database '{}'", name);
        Ok(Database::new(self, inner))
    }

    pub(crate) fn remove_sync_database(&self, inner: &Rc<DbInner>) {
        self.syncdbs.borrow_mut().retain(|db| !Rc::ptr_eq(db, inner));
        inner.mark_unregistered();
        debug!("Unregistered sync database '{}'", inner.name());
    }

    /// Unregister every sync database
    pub fn unregister_all_sync_databases(&self) -> Result<()> {
        let removed = std::mem::take(&mut *self.syncdbs.borrow_mut());
        for db in &removed {
            db.mark_unregistered();
        }
        debug!("Unregistered {} sync database(s)", removed.len());
        Ok(())
    }

    /// Drop cached package lists after the local store changed
    pub(crate) fn invalidate_local(&self) {
        self.localdb.invalidate();
    }

    /// Load a package from a package file
    ///
    /// The detached signature `<path>.sig` is checked against `siglevel`
    /// first. With `full` set the file list is read as well.
    pub fn load_package_file(
        &self,
        path: impl AsRef<Path>,
        siglevel: SigLevel,
        full: bool,
    ) -> Result<Package<'static>> {
        let path = path.as_ref();
        let level = siglevel.resolve(self.default_siglevel);

        let checked = signature::check_file(path, level.for_packages(), &self.gpgdir).map_err(|failure| {
            Error::Load {
                code: failure.code,
                path: path.display().to_string(),
                message: failure.message,
            }
        });
        self.check(checked)?;

        let record = self.check(pkgfile::read_package(path, full))?;
        self.log(
            LogLevel::Debug,
            &format!("loaded package {}-{} from {}", record.name, record.version, path.display()),
        );
        Ok(Package::owned(path.to_path_buf(), record))
    }

    /// Open the handle's single transaction
    ///
    /// Fails with [`Error::AlreadyOpen`] while another transaction is open.
    /// Unless `NO_LOCK` is given, the database lock file is taken as well.
    pub fn begin_transaction(&self, flags: TransFlags) -> Result<Transaction<'_>> {
        if self.trans_open.get() {
            return self.fail(Error::AlreadyOpen);
        }

        if !flags.contains(TransFlags::NO_LOCK) {
            self.check(self.acquire_lock())?;
        }

        self.trans_open.set(true);
        debug!("Transaction opened (flags: {})", flags);
        Ok(Transaction::new(self, flags))
    }

    pub fn is_transaction_open(&self) -> bool {
        self.trans_open.get()
    }

    /// Called by the transaction once it released its lock
    pub(crate) fn finish_transaction(&self) {
        self.trans_open.set(false);
    }

    fn acquire_lock(&self) -> Result<()> {
        let lock = self.lock_file();
        match fs::OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::init(
                ErrorCode::HandleLock,
                format!(
                    "unable to lock database: {} exists (remove it if no other process is running)",
                    lock.display()
                ),
            )),
            Err(e) => Err(Error::init(
                ErrorCode::HandleLock,
                format!("unable to create {}: {}", lock.display(), e),
            )),
        }
    }

    pub(crate) fn release_lock(&self) -> Result<()> {
        match fs::remove_file(self.lock_file()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Release {
                code: ErrorCode::TransNotLocked,
                message: format!("could not remove lock file {}: {}", self.lock_file().display(), e),
            }),
        }
    }

    /// Force-remove a stale lock file
    pub fn unlock(&self) -> Result<()> {
        self.check(self.release_lock())?;
        info!("Removed lock file {}", self.lock_file().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_handle() -> (TempDir, Handle) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let handle = Handle::open(&root, temp_dir.path().join("db")).unwrap();
        (temp_dir, handle)
    }

    #[test]
    fn test_open_requires_existing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = Handle::open(temp_dir.path().join("missing"), temp_dir.path().join("db"))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Init { code: ErrorCode::NotADirectory, .. }));
    }

    #[test]
    fn test_open_creates_dbpath() {
        let (temp_dir, handle) = open_handle();
        assert!(temp_dir.path().join("db").join(store::LOCAL_DB_FILE).exists());
        assert_eq!(handle.last_error(), None);
        handle.close().unwrap();
    }

    #[test]
    fn test_setters() {
        let (_temp_dir, mut handle) = open_handle();
        handle.set_architecture("aarch64");
        handle.set_keyring_dir("/tmp/keys");
        handle.add_cache_dir("/tmp/cache");
        handle.add_cache_dir("/tmp/cache");
        handle.set_default_siglevel(SigLevel::PACKAGE | SigLevel::USE_DEFAULT);

        assert_eq!(handle.architecture(), "aarch64");
        assert_eq!(handle.keyring_dir(), Path::new("/tmp/keys"));
        assert_eq!(handle.cache_dirs().len(), 2);
        assert_eq!(handle.default_siglevel(), SigLevel::PACKAGE);
    }

    #[test]
    fn test_register_sync_database() {
        let (_temp_dir, handle) = open_handle();
        let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT).unwrap();
        assert_eq!(core.name(), "core");
        assert_eq!(core.siglevel(), handle.default_siglevel());

        assert!(handle.register_sync_database("core", SigLevel::empty()).is_err());
        assert_eq!(handle.last_error(), Some(ErrorCode::WrongArgs));
        assert!(handle.register_sync_database("local", SigLevel::empty()).is_err());

        handle.register_sync_database("extra", SigLevel::empty()).unwrap();
        let names: Vec<String> = handle
            .sync_databases()
            .iter()
            .map(|db| db.name().to_string())
            .collect();
        assert_eq!(names, vec!["core", "extra"]);

        handle.unregister_all_sync_databases().unwrap();
        assert!(handle.sync_databases().is_empty());
        assert!(!core.is_registered());
    }

    #[test]
    fn test_lock_file_blocks_second_transaction_process() {
        let (_temp_dir, handle) = open_handle();
        fs::write(handle.lock_file(), "").unwrap();

        let err = handle.begin_transaction(TransFlags::empty()).err().unwrap();
        assert!(matches!(err, Error::Init { code: ErrorCode::HandleLock, .. }));
        assert!(!handle.is_transaction_open());

        handle.unlock().unwrap();
        assert!(!handle.lock_file().exists());
        let mut trans = handle.begin_transaction(TransFlags::empty()).unwrap();
        assert!(handle.lock_file().exists());
        trans.end().unwrap();
        assert!(!handle.lock_file().exists());
    }

    #[test]
    fn test_log_sink_sees_errors() {
        let (_temp_dir, mut handle) = open_handle();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink_seen = Rc::clone(&seen);
        handle.set_log_sink(move |level, msg| sink_seen.borrow_mut().push((level, msg.to_string())));

        let _ = handle.register_sync_database("", SigLevel::empty());
        handle.log_raw(42, "unknown level");

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, LogLevel::Error);
    }
}
