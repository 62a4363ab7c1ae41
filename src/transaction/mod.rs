// src/transaction/mod.rs

//! Package transactions
//!
//! A transaction collects packages to install and remove, checks them
//! (`prepare`), applies them to the root filesystem and the local store
//! (`commit`) and is finally released (`end`). The sequence is strict:
//!
//! ```text
//! Open --prepare--> Prepared --commit--> Committed
//!   |                  |          \--failure--> Interrupted
//!   +------------------+--------------+-------------+--end--> Released
//! ```
//!
//! Only one transaction can be open on a handle at a time.

mod commit;
mod deploy;
mod prepare;

use crate::error::{Error, ErrorCode, Result};
use crate::flags::TransFlags;
use crate::handle::Handle;
use crate::logging::LogLevel;
use crate::package::Package;
use std::fmt;
use std::slice;
use tracing::{debug, warn};

/// Lifecycle state of a [`Transaction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Open,
    Prepared,
    Committed,
    /// `commit` failed; only `end` is allowed
    Interrupted,
    Released,
}

impl TransactionState {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionState::Open => "open",
            TransactionState::Prepared => "prepared",
            TransactionState::Committed => "committed",
            TransactionState::Interrupted => "interrupted",
            TransactionState::Released => "released",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single open transaction of a [`Handle`]
pub struct Transaction<'a> {
    handle: &'a Handle,
    flags: TransFlags,
    state: TransactionState,
    added: Vec<Package<'a>>,
    removed: Vec<Package<'a>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(handle: &'a Handle, flags: TransFlags) -> Self {
        Self {
            handle,
            flags,
            state: TransactionState::Open,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn flags(&self) -> TransFlags {
        self.flags
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn handle(&self) -> &'a Handle {
        self.handle
    }

    fn require(&self, operation: &'static str, allowed: &[TransactionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            self.handle.fail(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Reject packages that belong to another handle or whose database has
    /// been unregistered
    fn check_handle(&self, pkg: &Package<'a>) -> Result<()> {
        match pkg.database() {
            Some(db) if !std::ptr::eq(db.handle(), self.handle) => self.handle.fail(Error::db(
                ErrorCode::WrongArgs,
                format!("{} belongs to a different handle", pkg.name()),
            )),
            Some(db) if !db.is_registered() => self.handle.fail(Error::db(
                ErrorCode::DbNotFound,
                format!("{} comes from unregistered database '{}'", pkg.name(), db.name()),
            )),
            _ => Ok(()),
        }
    }

    /// Staged packages may outlive their database's registration
    fn check_staged(&self) -> Result<()> {
        for pkg in self.added.iter().chain(&self.removed) {
            self.check_handle(pkg)?;
        }
        Ok(())
    }

    /// Stage a package for installation
    ///
    /// The package comes from a package file or a sync database. Staging the
    /// same package twice is not detected here.
    pub fn stage_add(&mut self, pkg: Package<'a>) -> Result<()> {
        self.require("stage packages in", &[TransactionState::Open])?;
        self.check_handle(&pkg)?;
        if pkg.database().is_some_and(|db| db.is_local()) {
            return self.handle.fail(Error::db(
                ErrorCode::WrongArgs,
                format!("{} is already installed", pkg.name()),
            ));
        }

        debug!("Staging {} for installation", pkg);
        self.added.push(pkg);
        Ok(())
    }

    /// Stage an installed package for removal
    pub fn stage_remove(&mut self, pkg: Package<'a>) -> Result<()> {
        self.require("stage packages in", &[TransactionState::Open])?;
        self.check_handle(&pkg)?;
        if !pkg.database().is_some_and(|db| db.is_local()) {
            return self.handle.fail(Error::db(
                ErrorCode::WrongArgs,
                format!("{} is not from the local database", pkg.name()),
            ));
        }

        debug!("Staging {} for removal", pkg);
        self.removed.push(pkg);
        Ok(())
    }

    /// Packages staged for installation, in staging order
    ///
    /// Each call returns a fresh iterator. After `prepare` this reflects the
    /// checked set (duplicates and up-to-date targets dropped).
    pub fn added_packages(&self) -> Result<slice::Iter<'_, Package<'a>>> {
        self.require(
            "list packages of",
            &[TransactionState::Open, TransactionState::Prepared],
        )?;
        Ok(self.added.iter())
    }

    /// Packages staged for removal, in staging order
    ///
    /// After `prepare` this includes packages pulled in by cascade or
    /// recursive removal.
    pub fn removed_packages(&self) -> Result<slice::Iter<'_, Package<'a>>> {
        self.require(
            "list packages of",
            &[TransactionState::Open, TransactionState::Prepared],
        )?;
        Ok(self.removed.iter())
    }

    /// Check the staged packages
    ///
    /// On failure the transaction stays open so staging can be adjusted.
    pub fn prepare(&mut self) -> Result<()> {
        self.require("prepare", &[TransactionState::Open])?;
        self.handle.log(LogLevel::Debug, "preparing transaction");
        self.check_staged()?;

        let installed = self.handle.local_database().packages()?;
        let resolution = prepare::resolve(
            self.flags,
            self.handle.architecture(),
            &installed,
            &self.added,
            &self.removed,
        );

        match resolution {
            Ok(resolution) => {
                for skipped in &resolution.skipped {
                    self.handle.log(LogLevel::Warning, skipped);
                }
                self.added = resolution.added;
                self.removed = resolution.removed;
                self.state = TransactionState::Prepared;
                debug!(
                    "Transaction prepared: {} to install, {} to remove",
                    self.added.len(),
                    self.removed.len()
                );
                Ok(())
            }
            Err(problems) => {
                for problem in &problems {
                    self.handle.log(LogLevel::Warning, &problem.to_string());
                }
                self.handle.fail(Error::Prepare {
                    code: prepare::problem_code(&problems),
                    problems,
                })
            }
        }
    }

    /// Apply the prepared transaction
    ///
    /// Failure leaves the transaction `Interrupted`; partial changes are not
    /// rolled back and the transaction can only be ended.
    pub fn commit(&mut self) -> Result<()> {
        self.require("commit", &[TransactionState::Prepared])?;
        self.handle.log(LogLevel::Debug, "committing transaction");
        self.check_staged()?;

        let result = if !self.flags.contains(TransFlags::NO_LOCK) && !self.handle.lock_file().exists() {
            Err(Error::Commit {
                code: ErrorCode::TransNotLocked,
                package: None,
                message: format!("lock file {} disappeared", self.handle.lock_file().display()),
            })
        } else {
            commit::apply(self.handle, self.flags, &self.added, &self.removed)
        };
        self.handle.invalidate_local();

        match result {
            Ok(()) => {
                self.state = TransactionState::Committed;
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::Interrupted;
                self.handle.fail(err)
            }
        }
    }

    /// Release the transaction and the database lock
    ///
    /// If the lock cannot be removed the state is kept and `end` may be
    /// retried (or the lock removed with [`Handle::unlock`]).
    pub fn end(&mut self) -> Result<()> {
        self.require(
            "end",
            &[
                TransactionState::Open,
                TransactionState::Prepared,
                TransactionState::Committed,
                TransactionState::Interrupted,
            ],
        )?;
        let released = self.release();
        self.handle.check(released)
    }

    fn release(&mut self) -> Result<()> {
        if !self.flags.contains(TransFlags::NO_LOCK) {
            self.handle.release_lock()?;
        }
        self.handle.finish_transaction();
        self.added.clear();
        self.removed.clear();
        self.state = TransactionState::Released;
        debug!("Transaction released");
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state != TransactionState::Released {
            if let Err(e) = self.release() {
                warn!("Failed to release dropped transaction: {}", e);
                // The slot is freed regardless; the stale lock needs `unlock`
                self.handle.finish_transaction();
            }
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("flags", &self.flags)
            .field("state", &self.state)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .finish()
    }
}
