//! Database handle
//!
//! One SQLite connection behind a mutex, shared by every repository. All
//! store calls are synchronous; async callers run them on a blocking thread.

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Current time as stored in timestamp columns
#[inline]
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Shared SQLite handle
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database file and apply migrations
    ///
    /// # Errors
    /// Returns error if the file cannot be opened or migrated
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        tracing::info!("opened database at {}", path.as_ref().display());
        Self::init(conn)
    }

    /// Open a private in-memory database
    ///
    /// # Errors
    /// Returns error if migrations fail
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        // Table rebuilds in migrations need foreign keys off
        crate::schema::migrate(&conn)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection
    ///
    /// # Errors
    /// Propagates the closure's error
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure inside a transaction
    ///
    /// Commits when the closure succeeds; any error rolls everything back.
    ///
    /// # Errors
    /// Propagates the closure's error or a commit failure
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Read a text column and parse it into a domain type
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Count rows of a single-value COUNT query
pub(crate) fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}
