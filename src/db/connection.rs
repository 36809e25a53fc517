//! Single-slot connection management.
//!
//! The manager keeps exactly one physical SQLite connection behind a mutex.
//! The handle is opened lazily and configured once; after [`ConnectionManager::close_all`]
//! every access fails instead of silently reconnecting.

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::db::executor::{translate_error, value_ref_to_json};
use crate::error::{Result, StoreError};
use crate::utils::ensure_database_directory;

/// A value that may be written with `PRAGMA name = value`.
#[derive(Debug, Clone, PartialEq)]
pub enum PragmaValue {
    Integer(i64),
    /// Keyword such as `WAL`, `NORMAL` or `MEMORY`
    Keyword(String),
}

impl PragmaValue {
    fn to_sql(&self) -> Result<String> {
        match self {
            PragmaValue::Integer(n) => Ok(n.to_string()),
            PragmaValue::Keyword(word) => {
                if is_identifier(word) {
                    Ok(word.clone())
                } else {
                    Err(StoreError::Query(format!("invalid pragma value: {word}")))
                }
            }
        }
    }
}

impl From<i64> for PragmaValue {
    fn from(n: i64) -> Self {
        PragmaValue::Integer(n)
    }
}

impl From<&str> for PragmaValue {
    fn from(word: &str) -> Self {
        PragmaValue::Keyword(word.to_string())
    }
}

/// Owns the store's only connection.
pub struct ConnectionManager {
    config: StoreConfig,
    slot: Mutex<Slot>,
}

enum Slot {
    Empty,
    Open(Connection),
    Closed,
}

impl ConnectionManager {
    /// Creates a manager; no connection is opened until first use.
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Returns the configuration this manager was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the live connection, opening and configuring it on first use.
    ///
    /// The returned guard holds the connection lock; drop it before emitting
    /// events or calling back into other tables.
    pub fn get_connection(&self) -> Result<MappedMutexGuard<'_, Connection>> {
        let mut slot = self.slot.lock();
        match *slot {
            Slot::Closed => {
                return Err(StoreError::Connection(
                    "connection manager has been closed".to_string(),
                ));
            }
            Slot::Empty => {
                let conn = self.open()?;
                *slot = Slot::Open(conn);
            }
            Slot::Open(_) => {}
        }

        Ok(MutexGuard::map(slot, |slot| match slot {
            Slot::Open(conn) => conn,
            // The match above left the slot open
            Slot::Empty | Slot::Closed => unreachable!("connection slot not open"),
        }))
    }

    /// Runs `f` with the connection held for its duration.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.get_connection()?;
        f(&conn)
    }

    /// Reads (`value = None`) or sets an engine option.
    ///
    /// Returns the current value for reads and `None` for writes.
    pub fn execute_pragma(&self, name: &str, value: Option<PragmaValue>) -> Result<Option<Value>> {
        let conn = self.get_connection()?;
        run_pragma(&conn, name, value.as_ref())
    }

    /// Releases the connection. Later calls fail with a connection error.
    pub fn close_all(&self) -> Result<()> {
        let mut slot = self.slot.lock();
        let previous = std::mem::replace(&mut *slot, Slot::Closed);
        if let Slot::Open(conn) = previous {
            conn.close().map_err(|(_, e)| {
                StoreError::Connection(format!("failed to close connection: {e}"))
            })?;
            info!(path = %self.config.path.display(), "Closed SQLite connection");
        }
        Ok(())
    }

    /// Returns true once `close_all` has been called.
    pub fn is_closed(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Closed)
    }

    fn open(&self) -> Result<Connection> {
        info!(path = %self.config.path.display(), "Opening SQLite connection");

        let conn = if self.config.is_memory() {
            Connection::open_in_memory()
        } else {
            ensure_database_directory(&self.config.path)?;
            Connection::open(&self.config.path)
        }
        .map_err(|e| StoreError::Connection(format!("failed to open database: {e}")))?;

        self.apply_baseline(&conn)?;
        Ok(conn)
    }

    /// Baseline settings applied exactly once per physical connection.
    fn apply_baseline(&self, conn: &Connection) -> Result<()> {
        debug!("Configuring SQLite pragmas");

        let settings: [(&str, PragmaValue); 6] = [
            ("foreign_keys", "ON".into()),
            ("journal_mode", "WAL".into()),
            ("synchronous", "NORMAL".into()),
            ("temp_store", "MEMORY".into()),
            ("cache_size", self.config.cache_size.into()),
            ("busy_timeout", i64::from(self.config.busy_timeout_ms).into()),
        ];
        for (name, value) in &settings {
            run_pragma(conn, name, Some(value))
                .map_err(|e| StoreError::Connection(format!("failed to set {name}: {e}")))?;
        }
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

fn run_pragma(conn: &Connection, name: &str, value: Option<&PragmaValue>) -> Result<Option<Value>> {
    if !is_identifier(name) {
        return Err(StoreError::Query(format!("invalid pragma name: {name}")));
    }

    let sql = match value {
        Some(value) => format!("PRAGMA {name} = {}", value.to_sql()?),
        None => format!("PRAGMA {name}"),
    };

    let mut stmt = conn.prepare(&sql).map_err(translate_error)?;
    let mut rows = stmt.query([]).map_err(translate_error)?;
    // Some pragmas echo the new value on write; drain it either way
    let first = match rows.next().map_err(translate_error)? {
        Some(row) => Some(value_ref_to_json(row.get_ref(0).map_err(translate_error)?)),
        None => None,
    };

    Ok(if value.is_some() { None } else { first })
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
