//! The contract every table plugin implements, plus the shared context
//! and row/record helpers plugins are built from.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::db::{Row, SqlExecutor, TransactionManager};
use crate::error::{Result, StoreError};
use crate::events::{EventBus, TableAction, TableEvent};

/// Handles every plugin shares: statement executor, transactions, events.
#[derive(Clone)]
pub struct PluginContext {
    pub executor: SqlExecutor,
    pub transactions: Arc<TransactionManager>,
    pub events: Arc<EventBus>,
}

impl PluginContext {
    pub fn new(
        executor: SqlExecutor,
        transactions: Arc<TransactionManager>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            executor,
            transactions,
            events,
        }
    }

    /// Publishes a `completed` event for a write on `table`.
    pub fn emit_completed<T: Serialize>(
        &self,
        table: &str,
        action: TableAction,
        record_id: &str,
        record: Option<&T>,
    ) {
        let data = record.and_then(|r| serde_json::to_value(r).ok());
        self.events
            .emit(&TableEvent::completed(table, action, record_id, data));
    }
}

/// Lifecycle contract the registry drives.
pub trait TablePlugin: Send + Sync {
    /// Name of the backing table.
    fn table_name(&self) -> &'static str;

    /// Schema version of this plugin.
    fn version(&self) -> &'static str;

    /// Tables that must be enabled before this one.
    fn dependencies(&self) -> &'static [&'static str] {
        &[]
    }

    /// Creates the table and its indexes. Must be idempotent.
    fn create_table(&self) -> Result<()>;

    /// Subscribes to other tables' events.
    fn register_events(&self) -> Result<()> {
        Ok(())
    }

    /// Removes every subscription made by `register_events`.
    fn unregister_events(&self) {}

    /// Number of stored rows.
    fn count(&self) -> Result<i64>;
}

/// CRUD contract shared by every table.
///
/// `validate_data` takes a raw JSON payload and returns the normalized
/// record without touching storage; every write goes through it.
pub trait RecordTable: TablePlugin {
    type Record: Serialize + DeserializeOwned + Clone;

    fn validate_data(&self, raw: &Value) -> Result<Self::Record>;

    /// Validates and stores a new record, returning its primary key.
    fn insert(&self, raw: &Value) -> Result<String>;

    /// Merges `changes` onto the stored record, re-validates and writes it.
    fn update(&self, id: &str, changes: &Value) -> Result<Self::Record>;

    /// Removes a record. Returns false when nothing matched.
    fn delete(&self, id: &str) -> Result<bool>;

    fn query_by_id(&self, id: &str) -> Result<Option<Self::Record>>;

    fn query_all(&self) -> Result<Vec<Self::Record>>;
}

/// Requires `raw` to be a JSON object.
pub(crate) fn expect_object<'a>(raw: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    raw.as_object()
        .ok_or_else(|| StoreError::validation(format!("{what} must be a JSON object")))
}

/// Shallow merge: keys in `changes` replace keys in `base`.
pub(crate) fn merge_changes(base: &Value, changes: &Value, what: &str) -> Result<Value> {
    let mut merged = expect_object(base, what)?.clone();
    for (key, value) in expect_object(changes, "changes")? {
        merged.insert(key.clone(), value.clone());
    }
    Ok(Value::Object(merged))
}

/// Rebuilds a record from a row: scalar columns plus the parsed payload
/// column flattened into one object.
pub(crate) fn row_to_record<T: DeserializeOwned>(mut row: Row, payload_column: &str) -> Result<T> {
    let payload = match row.remove(payload_column) {
        Some(Value::String(text)) => serde_json::from_str::<Value>(&text)
            .map_err(|e| StoreError::Query(format!("corrupt {payload_column}: {e}")))?,
        Some(Value::Null) | None => Value::Object(Map::new()),
        Some(other) => other,
    };

    let mut object = Map::new();
    if let Value::Object(fields) = payload {
        object.extend(fields);
    }
    // Scalar columns win over payload keys of the same name
    object.extend(row);

    serde_json::from_value(Value::Object(object))
        .map_err(|e| StoreError::Query(format!("row does not match record shape: {e}")))
}

/// Decodes every row with [`row_to_record`].
pub(crate) fn rows_to_records<T: DeserializeOwned>(rows: Vec<Row>, payload_column: &str) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| row_to_record(row, payload_column))
        .collect()
}

/// Serializes a payload struct for the `json_data` column.
pub(crate) fn to_json_text<T: Serialize>(payload: &T) -> Result<String> {
    serde_json::to_string(payload).map_err(|e| StoreError::Query(format!("failed to encode payload: {e}")))
}

/// Serializes `record` and drops the keys stored in their own columns,
/// leaving the text for the payload column.
pub(crate) fn payload_json<T: Serialize>(record: &T, columns: &[&str]) -> Result<String> {
    let mut fields = match serde_json::to_value(record)? {
        Value::Object(fields) => fields,
        _ => return Err(StoreError::Query("record did not serialize to an object".into())),
    };
    for column in columns {
        fields.remove(*column);
    }
    to_json_text(&fields)
}

/// Builds the raw payload for an update: the stored record with `changes`
/// merged on top, the key and `created_at` pinned, `version` bumped and
/// `updated_at` set to `now`.
pub(crate) fn merge_for_update<T: Serialize>(
    current: &T,
    changes: &Value,
    id_field: &str,
    now: i64,
) -> Result<Value> {
    let current = serde_json::to_value(current)?;
    let changes_obj = expect_object(changes, "changes")?;
    if let Some(new_id) = changes_obj.get(id_field)
        && Some(new_id) != current.get(id_field)
    {
        return Err(StoreError::validation(format!("{id_field} cannot be changed")));
    }

    let Value::Object(mut merged) = merge_changes(&current, changes, "record")? else {
        return Err(StoreError::Query("stored record is not an object".into()));
    };
    let version = current.get("version").and_then(Value::as_i64).unwrap_or(0);
    merged.insert("version".into(), Value::from(version + 1));
    merged.insert("updated_at".into(), Value::from(now));
    if let Some(created_at) = current.get("created_at") {
        merged.insert("created_at".into(), created_at.clone());
    }
    Ok(Value::Object(merged))
}
