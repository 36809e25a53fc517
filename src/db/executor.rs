//! Parameterized statement execution and engine error translation.

use std::sync::Arc;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, ffi, params_from_iter};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::db::connection::ConnectionManager;
use crate::error::{ConstraintKind, Result, StoreError};

/// A bound statement parameter.
pub use rusqlite::types::Value as SqlValue;

/// One result row keyed by column name, in column order.
pub type Row = Map<String, Value>;

/// Runs SQL against the manager's connection.
///
/// Every method locks the connection for a single statement (or a single
/// batch/script) and releases it before returning.
#[derive(Clone)]
pub struct SqlExecutor {
    connections: Arc<ConnectionManager>,
}

impl SqlExecutor {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// The connection manager backing this executor.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Runs a read statement and returns every row.
    pub fn execute_query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        debug!(sql, params = params.len(), "query");
        self.connections
            .with_connection(|conn| query_rows(conn, sql, params))
    }

    /// Runs a read statement and returns the first row, if any.
    pub fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.execute_query(sql, params)?.into_iter().next())
    }

    /// Runs a read statement returning a single integer (e.g. `COUNT(*)`).
    pub fn query_i64(&self, sql: &str, params: &[SqlValue]) -> Result<i64> {
        let row = self
            .query_one(sql, params)?
            .ok_or_else(|| StoreError::Query(format!("statement returned no rows: {sql}")))?;
        row.values()
            .next()
            .and_then(Value::as_i64)
            .ok_or_else(|| StoreError::Query(format!("statement did not return an integer: {sql}")))
    }

    /// Runs a write statement and returns the number of affected rows.
    pub fn execute_update(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        debug!(sql, params = params.len(), "update");
        self.connections.with_connection(|conn| {
            conn.execute(sql, params_from_iter(params.iter()))
                .map_err(translate_error)
        })
    }

    /// Runs one statement once per parameter set and returns the total
    /// number of affected rows.
    ///
    /// Not atomic by itself; wrap it in a transaction when all-or-nothing
    /// semantics are required.
    pub fn execute_batch(&self, sql: &str, param_sets: &[Vec<SqlValue>]) -> Result<usize> {
        debug!(sql, sets = param_sets.len(), "batch");
        self.connections.with_connection(|conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(translate_error)?;
            let mut affected = 0;
            for params in param_sets {
                affected += stmt
                    .execute(params_from_iter(params.iter()))
                    .map_err(translate_error)?;
            }
            Ok(affected)
        })
    }

    /// Runs several `;`-separated statements that take no parameters.
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        self.connections
            .with_connection(|conn| conn.execute_batch(sql).map_err(translate_error))
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(translate_error)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt
        .query(params_from_iter(params.iter()))
        .map_err(translate_error)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(translate_error)? {
        let mut record = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            let value = row.get_ref(idx).map_err(translate_error)?;
            record.insert(name.clone(), value_ref_to_json(value));
        }
        out.push(record);
    }
    Ok(out)
}

/// Converts a raw SQLite value into JSON.
pub(crate) fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

/// Maps a rusqlite failure onto the store's error taxonomy.
pub(crate) fn translate_error(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message) => {
            let detail = message.clone().unwrap_or_else(|| failure.to_string());
            match failure.code {
                ErrorCode::ConstraintViolation => {
                    let kind = match failure.extended_code {
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                            ConstraintKind::Unique
                        }
                        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
                        ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
                        ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
                        _ => ConstraintKind::Other,
                    };
                    StoreError::Constraint {
                        kind,
                        message: detail,
                    }
                }
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly => StoreError::Connection(detail),
                _ => StoreError::Query(detail),
            }
        }
        _ => StoreError::Query(err.to_string()),
    }
}
