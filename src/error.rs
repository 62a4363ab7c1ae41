// src/error.rs

use std::fmt;
use thiserror::Error;

/// Engine-level error codes recorded on the handle
///
/// Every [`Error`] maps onto one of these through [`Error::code`], and the
/// handle remembers the most recent one (see `Handle::last_error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    System,
    BadPermissions,
    NotAFile,
    NotADirectory,
    WrongArgs,
    HandleLock,
    DbOpen,
    DbCreate,
    DbNotFound,
    DbInvalid,
    DbInvalidSig,
    DbVersion,
    DbWrite,
    ServerBadUrl,
    ServerNone,
    TransNotNull,
    TransNull,
    TransNotInitialized,
    TransNotPrepared,
    TransAbort,
    TransNotLocked,
    PkgNotFound,
    PkgInvalid,
    PkgInvalidChecksum,
    PkgInvalidArch,
    PkgOpen,
    PkgCantRemove,
    SigMissing,
    SigInvalid,
    UnsatisfiedDeps,
    ConflictingDeps,
    FileConflicts,
    Retrieve,
    InvalidRegex,
    Archive,
    UnknownName,
}

impl ErrorCode {
    /// Human-readable text for this code
    pub fn describe(self) -> &'static str {
        match self {
            ErrorCode::System => "unexpected system error",
            ErrorCode::BadPermissions => "permission denied",
            ErrorCode::NotAFile => "could not find or read file",
            ErrorCode::NotADirectory => "could not find or read directory",
            ErrorCode::WrongArgs => "wrong or NULL argument passed",
            ErrorCode::HandleLock => "unable to lock database",
            ErrorCode::DbOpen => "could not open database",
            ErrorCode::DbCreate => "could not create database",
            ErrorCode::DbNotFound => "database not found",
            ErrorCode::DbInvalid => "invalid or corrupted database",
            ErrorCode::DbInvalidSig => "invalid or corrupted database (PGP signature)",
            ErrorCode::DbVersion => "database is incorrect version",
            ErrorCode::DbWrite => "could not update database",
            ErrorCode::ServerBadUrl => "invalid url for server",
            ErrorCode::ServerNone => "no servers configured for repository",
            ErrorCode::TransNotNull => "transaction already initialized",
            ErrorCode::TransNull => "transaction not initialized",
            ErrorCode::TransNotInitialized => "operation not compatible with the transaction state",
            ErrorCode::TransNotPrepared => "transaction not prepared",
            ErrorCode::TransAbort => "transaction aborted",
            ErrorCode::TransNotLocked => "transaction commit attempt when database is not locked",
            ErrorCode::PkgNotFound => "could not find or read package",
            ErrorCode::PkgInvalid => "invalid or corrupted package",
            ErrorCode::PkgInvalidChecksum => "invalid or corrupted package (checksum)",
            ErrorCode::PkgInvalidArch => "package architecture is not valid",
            ErrorCode::PkgOpen => "cannot open package file",
            ErrorCode::PkgCantRemove => "cannot remove all files for package",
            ErrorCode::SigMissing => "missing PGP signature",
            ErrorCode::SigInvalid => "invalid PGP signature",
            ErrorCode::UnsatisfiedDeps => "could not satisfy dependencies",
            ErrorCode::ConflictingDeps => "conflicting dependencies",
            ErrorCode::FileConflicts => "conflicting files",
            ErrorCode::Retrieve => "failed to retrieve some files",
            ErrorCode::InvalidRegex => "invalid regular expression",
            ErrorCode::Archive => "archive error",
            ErrorCode::UnknownName => "unrecognized configuration name",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Render an error code to text
pub fn describe_error(code: ErrorCode) -> &'static str {
    code.describe()
}

/// A single reason why `prepare` refused a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareProblem {
    /// `target` requires `depend`, and nothing installed or staged provides it
    MissingDependency { target: String, depend: String },
    /// `package1` and `package2` declare a conflict (`reason` is the conflict entry)
    Conflict {
        package1: String,
        package2: String,
        reason: String,
    },
    /// Removing `removed` would leave `dependent` without `depend`
    BreaksDependency {
        removed: String,
        dependent: String,
        depend: String,
    },
    /// Package architecture does not match the handle
    InvalidArch { package: String, arch: String },
}

impl fmt::Display for PrepareProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepareProblem::MissingDependency { target, depend } => {
                write!(f, "{}: requires {}", target, depend)
            }
            PrepareProblem::Conflict {
                package1,
                package2,
                reason,
            } => write!(f, "{} and {} are in conflict ({})", package1, package2, reason),
            PrepareProblem::BreaksDependency {
                removed,
                dependent,
                depend,
            } => write!(
                f,
                "removing {} breaks dependency '{}' required by {}",
                removed, depend, dependent
            ),
            PrepareProblem::InvalidArch { package, arch } => {
                write!(f, "package {} does not have a valid architecture ({})", package, arch)
            }
        }
    }
}

/// Core error types for alpmkit
#[derive(Error, Debug)]
pub enum Error {
    /// The handle could not acquire its directories, storage or lock
    #[error("Initialization failed: {message} ({code})")]
    Init { code: ErrorCode, message: String },

    /// Database registration, validation or lookup failure
    #[error("Database error: {message} ({code})")]
    Db { code: ErrorCode, message: String },

    /// Malformed package file or signature policy violation
    #[error("Failed to load package {path}: {message} ({code})")]
    Load {
        code: ErrorCode,
        path: String,
        message: String,
    },

    /// Dependency or conflict resolution refused the transaction
    #[error("Failed to prepare transaction: {code} ({} problem(s))", .problems.len())]
    Prepare {
        code: ErrorCode,
        problems: Vec<PrepareProblem>,
    },

    /// Applying the transaction failed, possibly after partial changes
    #[error("Failed to commit transaction at {}: {message} ({code})", .package.as_deref().unwrap_or("<none>"))]
    Commit {
        code: ErrorCode,
        package: Option<String>,
        message: String,
    },

    /// The transaction could not be torn down
    #[error("Failed to release transaction: {message} ({code})")]
    Release { code: ErrorCode, message: String },

    /// A transaction is already open on this handle
    #[error("A transaction is already open on this handle")]
    AlreadyOpen,

    /// Transaction state machine misuse
    #[error("Cannot {operation} a transaction in state {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::transaction::TransactionState,
    },

    /// Unrecognized flag or signature-level name
    #[error("Unknown {kind} name: {name}")]
    Config { kind: &'static str, name: String },

    /// Local storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The engine error code this error corresponds to
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Init { code, .. }
            | Error::Db { code, .. }
            | Error::Load { code, .. }
            | Error::Prepare { code, .. }
            | Error::Commit { code, .. }
            | Error::Release { code, .. } => *code,
            Error::AlreadyOpen => ErrorCode::TransNotNull,
            Error::InvalidState { .. } => ErrorCode::TransNotInitialized,
            Error::Config { .. } => ErrorCode::UnknownName,
            Error::Storage(_) => ErrorCode::DbWrite,
            Error::Io(_) => ErrorCode::System,
        }
    }

    pub(crate) fn db(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Db {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn init(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Init {
            code,
            message: message.into(),
        }
    }
}

/// Result type alias using alpmkit's Error type
pub type Result<T> = std::result::Result<T, Error>;
