// src/store/mod.rs

//! Local package store
//!
//! The local (installed) database lives in a SQLite file under the handle's
//! database directory. This module handles:
//! - Opening and creating the store file
//! - Schema migrations
//! - Transaction handling
//! - CRUD operations for installed packages and their files

pub mod models;
pub mod schema;

use crate::error::{Error, ErrorCode, Result};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::{debug, info};

/// File name of the local store inside the database directory
pub const LOCAL_DB_FILE: &str = "local.db";

/// Open the local store at `db_path`, creating and migrating it as needed
pub fn open(db_path: &Path) -> Result<Connection> {
    debug!("Opening local store at: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::init(
                ErrorCode::DbCreate,
                format!("failed to create database directory {}: {}", parent.display(), e),
            )
        })?;
    }

    let existed = db_path.exists();
    let conn = Connection::open(db_path).map_err(|e| {
        Error::init(
            ErrorCode::DbOpen,
            format!("failed to open {}: {}", db_path.display(), e),
        )
    })?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    if !existed {
        info!("Created local store at {}", db_path.display());
    }
    Ok(conn)
}

/// Run `f` inside a SQLite transaction, committing only when it succeeds
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}
