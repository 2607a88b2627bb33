//! rollcall-store: SQLite persistence for students, attendance and faculty.
//!
//! A [`Store`] owns one connection behind a mutex. Every operation checks the
//! connection first and reopens the database once if it has gone away.

pub mod faculty;
pub mod ledger;
mod schema;
pub mod students;

pub use ledger::{AttendanceRecord, AttendanceStats, LedgerError, RecordResult};

use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type HealthCheck = fn(&Connection) -> rusqlite::Result<()>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("student ID {0} already exists")]
    DuplicateIdentity(String),
    #[error("student ID {0} not found")]
    UnknownStudent(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Handle to the attendance database.
pub struct Store {
    location: Location,
    conn: Mutex<Connection>,
    health_check: HealthCheck,
}

impl Store {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let location = Location::File(path.to_path_buf());
        let conn = connect(&location)?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(Self {
            location,
            conn: Mutex::new(conn),
            health_check: ping,
        })
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let location = Location::Memory;
        let conn = connect(&location)?;
        Ok(Self {
            location,
            conn: Mutex::new(conn),
            health_check: ping,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on a live connection, reconnecting once if the health check fails.
    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut guard = self.lock();
        revive(&mut guard, self.health_check, || connect(&self.location))?;
        f(&mut guard)
    }
}

fn ping(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("SELECT 1", [], |_| Ok(()))
}

/// Swap in a fresh connection when `check` fails. A failed reconnect leaves
/// the old connection in place and reports [`StoreError::Unavailable`].
fn revive<R>(conn: &mut Connection, check: HealthCheck, reconnect: R) -> Result<(), StoreError>
where
    R: FnOnce() -> Result<Connection, StoreError>,
{
    let Err(e) = check(conn) else {
        return Ok(());
    };
    tracing::warn!(error = %e, "database connection lost; reconnecting");
    match reconnect() {
        Ok(fresh) => {
            *conn = fresh;
            tracing::info!("database connection restored");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "database reconnect failed");
            Err(StoreError::Unavailable(e.to_string()))
        }
    }
}

fn connect(location: &Location) -> Result<Connection, StoreError> {
    let conn = match location {
        Location::File(path) => Connection::open(path)?,
        Location::Memory => Connection::open_in_memory()?,
    };
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    schema::ensure(&conn)?;
    Ok(conn)
}
