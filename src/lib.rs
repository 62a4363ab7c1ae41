// src/lib.rs

//! alpmkit
//!
//! Package transaction layer for Arch-style package databases: a [`Handle`]
//! owns one root filesystem, its local database of installed packages and any
//! number of sync databases, and runs one [`Transaction`] at a time.
//!
//! # Architecture
//!
//! - Local store: installed packages and their files in SQLite
//! - Sync databases: repository tarballs read on first use
//! - Transactions: stage, prepare (dependencies and conflicts), commit, end
//! - Signatures: detached OpenPGP signatures checked per signature level
//!
//! ```no_run
//! use alpmkit::{Handle, SigLevel, TransFlags};
//!
//! # fn main() -> alpmkit::Result<()> {
//! let handle = Handle::open("/", "/var/lib/pacman")?;
//! let core = handle.register_sync_database("core", SigLevel::USE_DEFAULT)?;
//!
//! let mut trans = handle.begin_transaction(TransFlags::empty())?;
//! if let Some(pkg) = core.lookup("bash")? {
//!     trans.stage_add(pkg)?;
//! }
//! trans.prepare()?;
//! trans.commit()?;
//! trans.end()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
mod error;
pub mod flags;
pub mod handle;
pub mod logging;
pub mod package;
mod signature;
pub mod store;
pub mod transaction;
pub mod version;

pub use config::HandleOptions;
pub use database::{Database, DbKind};
pub use error::{Error, ErrorCode, PrepareProblem, Result, describe_error};
pub use flags::{SigLevel, TransFlags};
pub use handle::Handle;
pub use logging::{LogLevel, LogSink};
pub use package::{DepMod, Depend, InstallReason, Package, PackageOrigin};
pub use transaction::{Transaction, TransactionState};
pub use version::vercmp;
