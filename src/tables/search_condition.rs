use serde_json::{Value, json};
use tracing::info;

use crate::db::SqlValue;
use crate::error::{Result, StoreError};
use crate::events::TableAction;
use crate::models::SearchCondition;
use crate::plugin::{
    PluginContext, RecordTable, TablePlugin, merge_for_update, payload_json, row_to_record,
    rows_to_records,
};
use crate::tables::text;
use crate::utils::now_ms;

const TABLE: &str = "search_condition";
const VERSION: &str = "1.0.0";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS search_condition (
    uuid TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    json_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(json_data))
);

CREATE INDEX IF NOT EXISTS idx_search_condition_use ON search_condition(json_extract(json_data, '$.use_count'));
"#;

const SELECT: &str =
    "SELECT uuid, name, created_at, updated_at, version, json_data FROM search_condition";

#[derive(Clone)]
pub struct SearchConditionTable {
    ctx: PluginContext,
}

impl SearchConditionTable {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    pub fn query_by_name(&self, name: &str) -> Result<Option<SearchCondition>> {
        let row = self.ctx.executor.query_one(
            &format!("{SELECT} WHERE name = ?1"),
            &[text(name.trim())],
        )?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    pub fn query_enabled(&self) -> Result<Vec<SearchCondition>> {
        let rows = self.ctx.executor.execute_query(
            &format!("{SELECT} WHERE json_extract(json_data, '$.enabled') = 1 ORDER BY name ASC"),
            &[],
        )?;
        rows_to_records(rows, "json_data")
    }

    /// Saved searches ordered by how often they ran.
    pub fn query_most_used(&self, limit: usize) -> Result<Vec<SearchCondition>> {
        let rows = self.ctx.executor.execute_query(
            &format!(
                "{SELECT} ORDER BY json_extract(json_data, '$.use_count') DESC, \
                 json_extract(json_data, '$.last_used_at') DESC, name ASC LIMIT ?1"
            ),
            &[SqlValue::Integer(limit as i64)],
        )?;
        rows_to_records(rows, "json_data")
    }

    /// Counts one execution of the search.
    pub fn record_use(&self, uuid: &str) -> Result<SearchCondition> {
        self.ctx.transactions.transaction(|| {
            let current = self.require(uuid)?;
            self.update(
                uuid,
                &json!({ "use_count": current.use_count + 1, "last_used_at": now_ms() }),
            )
        })
    }

    pub fn set_enabled(&self, uuid: &str, enabled: bool) -> Result<SearchCondition> {
        self.update(uuid, &json!({ "enabled": enabled }))
    }

    fn require(&self, uuid: &str) -> Result<SearchCondition> {
        self.query_by_id(uuid)?
            .ok_or_else(|| StoreError::validation(format!("search condition not found: {uuid}")))
    }

    fn params(record: &SearchCondition) -> Result<Vec<SqlValue>> {
        Ok(vec![
            text(record.uuid.clone()),
            text(record.name.clone()),
            SqlValue::Integer(record.created_at),
            SqlValue::Integer(record.updated_at),
            SqlValue::Integer(record.version),
            text(payload_json(record, SearchCondition::COLUMNS)?),
        ])
    }
}

impl TablePlugin for SearchConditionTable {
    fn table_name(&self) -> &'static str {
        TABLE
    }

    fn version(&self) -> &'static str {
        VERSION
    }

    fn create_table(&self) -> Result<()> {
        self.ctx.executor.execute_script(SCHEMA)
    }

    fn count(&self) -> Result<i64> {
        self.ctx
            .executor
            .query_i64("SELECT COUNT(*) FROM search_condition", &[])
    }
}

impl RecordTable for SearchConditionTable {
    type Record = SearchCondition;

    fn validate_data(&self, raw: &Value) -> Result<SearchCondition> {
        SearchCondition::validate(raw, now_ms())
    }

    fn insert(&self, raw: &Value) -> Result<String> {
        let record = self.validate_data(raw)?;
        self.ctx.executor.execute_update(
            "INSERT INTO search_condition (uuid, name, created_at, updated_at, version, json_data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            &Self::params(&record)?,
        )?;
        info!(uuid = %record.uuid, name = %record.name, "search condition saved");
        self.ctx
            .emit_completed(TABLE, TableAction::Create, &record.uuid, Some(&record));
        Ok(record.uuid)
    }

    fn update(&self, id: &str, changes: &Value) -> Result<SearchCondition> {
        let current = self.require(id)?;
        let merged = merge_for_update(&current, changes, "uuid", now_ms())?;
        let record = self.validate_data(&merged)?;
        self.ctx.executor.execute_update(
            "UPDATE search_condition SET name = ?2, created_at = ?3, updated_at = ?4, \
             version = ?5, json_data = ?6 WHERE uuid = ?1",
            &Self::params(&record)?,
        )?;
        self.ctx
            .emit_completed(TABLE, TableAction::Update, &record.uuid, Some(&record));
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .ctx
            .executor
            .execute_update("DELETE FROM search_condition WHERE uuid = ?1", &[text(id)])?;
        if removed == 0 {
            return Ok(false);
        }
        self.ctx
            .emit_completed::<SearchCondition>(TABLE, TableAction::Delete, id, None);
        Ok(true)
    }

    fn query_by_id(&self, id: &str) -> Result<Option<SearchCondition>> {
        let row = self
            .ctx
            .executor
            .query_one(&format!("{SELECT} WHERE uuid = ?1"), &[text(id)])?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    fn query_all(&self) -> Result<Vec<SearchCondition>> {
        let rows = self
            .ctx
            .executor
            .execute_query(&format!("{SELECT} ORDER BY name ASC"), &[])?;
        rows_to_records(rows, "json_data")
    }
}
