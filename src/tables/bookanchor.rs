use serde_json::{Value, json};
use tracing::info;

use crate::db::SqlValue;
use crate::error::{Result, StoreError};
use crate::events::TableAction;
use crate::models::Bookanchor;
use crate::plugin::{
    PluginContext, RecordTable, TablePlugin, merge_for_update, payload_json, row_to_record,
    rows_to_records,
};
use crate::tables::{follow_pdf_deletes, optional_int, pdf_delete_topic, pdf_info, text};
use crate::utils::now_ms;

const TABLE: &str = "pdf_bookanchor";
const VERSION: &str = "1.0.0";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pdf_bookanchor (
    uuid TEXT PRIMARY KEY NOT NULL,
    pdf_uuid TEXT NOT NULL REFERENCES pdf_info(uuid) ON DELETE CASCADE,
    page_at INTEGER NOT NULL CHECK (page_at >= 1),
    position REAL NOT NULL DEFAULT 0 CHECK (position >= 0 AND position <= 1),
    visited_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    json_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(json_data))
);

CREATE INDEX IF NOT EXISTS idx_pdf_bookanchor_pdf ON pdf_bookanchor(pdf_uuid);
CREATE INDEX IF NOT EXISTS idx_pdf_bookanchor_page ON pdf_bookanchor(pdf_uuid, page_at);
"#;

const SELECT: &str = "SELECT uuid, pdf_uuid, page_at, position, visited_at, created_at, \
                      updated_at, version, json_data FROM pdf_bookanchor";
const ORDER: &str = "ORDER BY page_at ASC, position ASC, uuid ASC";

#[derive(Clone)]
pub struct BookanchorTable {
    ctx: PluginContext,
}

impl BookanchorTable {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    pub fn query_by_pdf(&self, pdf_uuid: &str) -> Result<Vec<Bookanchor>> {
        let rows = self.ctx.executor.execute_query(
            &format!("{SELECT} WHERE pdf_uuid = ?1 {ORDER}"),
            &[text(pdf_uuid)],
        )?;
        rows_to_records(rows, "json_data")
    }

    /// The anchor currently marked active for a PDF, if any.
    pub fn query_active(&self, pdf_uuid: &str) -> Result<Option<Bookanchor>> {
        let row = self.ctx.executor.query_one(
            &format!(
                "{SELECT} WHERE pdf_uuid = ?1 AND json_extract(json_data, '$.is_active') = 1 \
                 ORDER BY updated_at DESC LIMIT 1"
            ),
            &[text(pdf_uuid)],
        )?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    /// Marks one anchor active and clears the flag on its siblings.
    pub fn set_active(&self, uuid: &str) -> Result<Bookanchor> {
        self.ctx.transactions.transaction(|| {
            let anchor = self.require(uuid)?;
            for sibling in self.query_by_pdf(&anchor.pdf_uuid)? {
                if sibling.is_active && sibling.uuid != uuid {
                    self.update(&sibling.uuid, &json!({ "is_active": false }))?;
                }
            }
            self.update(uuid, &json!({ "is_active": true }))
        })
    }

    /// Counts a jump to this anchor.
    pub fn record_use(&self, uuid: &str) -> Result<Bookanchor> {
        self.ctx.transactions.transaction(|| {
            let anchor = self.require(uuid)?;
            self.update(
                uuid,
                &json!({ "use_count": anchor.use_count + 1, "visited_at": now_ms() }),
            )
        })
    }

    pub fn delete_by_pdf(&self, pdf_uuid: &str) -> Result<usize> {
        self.ctx.executor.execute_update(
            "DELETE FROM pdf_bookanchor WHERE pdf_uuid = ?1",
            &[text(pdf_uuid)],
        )
    }

    fn require(&self, uuid: &str) -> Result<Bookanchor> {
        self.query_by_id(uuid)?
            .ok_or_else(|| StoreError::validation(format!("bookanchor not found: {uuid}")))
    }

    fn params(record: &Bookanchor) -> Result<Vec<SqlValue>> {
        Ok(vec![
            text(record.uuid.clone()),
            text(record.pdf_uuid.clone()),
            SqlValue::Integer(record.page_at),
            SqlValue::Real(record.position),
            optional_int(record.visited_at),
            SqlValue::Integer(record.created_at),
            SqlValue::Integer(record.updated_at),
            SqlValue::Integer(record.version),
            text(payload_json(record, Bookanchor::COLUMNS)?),
        ])
    }
}

impl TablePlugin for BookanchorTable {
    fn table_name(&self) -> &'static str {
        TABLE
    }

    fn version(&self) -> &'static str {
        VERSION
    }

    fn dependencies(&self) -> &'static [&'static str] {
        &[pdf_info::TABLE]
    }

    fn create_table(&self) -> Result<()> {
        self.ctx.executor.execute_script(SCHEMA)
    }

    fn register_events(&self) -> Result<()> {
        let table = self.clone();
        follow_pdf_deletes(&self.ctx, TABLE, move |pdf_uuid| table.delete_by_pdf(pdf_uuid));
        Ok(())
    }

    fn unregister_events(&self) {
        self.ctx.events.off(&pdf_delete_topic(), TABLE);
    }

    fn count(&self) -> Result<i64> {
        self.ctx
            .executor
            .query_i64("SELECT COUNT(*) FROM pdf_bookanchor", &[])
    }
}

impl RecordTable for BookanchorTable {
    type Record = Bookanchor;

    fn validate_data(&self, raw: &Value) -> Result<Bookanchor> {
        Bookanchor::validate(raw, now_ms())
    }

    fn insert(&self, raw: &Value) -> Result<String> {
        let record = self.validate_data(raw)?;
        self.ctx.executor.execute_update(
            "INSERT INTO pdf_bookanchor (uuid, pdf_uuid, page_at, position, visited_at, \
             created_at, updated_at, version, json_data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            &Self::params(&record)?,
        )?;
        info!(uuid = %record.uuid, pdf_uuid = %record.pdf_uuid, "bookanchor inserted");
        self.ctx
            .emit_completed(TABLE, TableAction::Create, &record.uuid, Some(&record));
        Ok(record.uuid)
    }

    fn update(&self, id: &str, changes: &Value) -> Result<Bookanchor> {
        let current = self.require(id)?;
        let merged = merge_for_update(&current, changes, "uuid", now_ms())?;
        let record = self.validate_data(&merged)?;
        self.ctx.executor.execute_update(
            "UPDATE pdf_bookanchor SET pdf_uuid = ?2, page_at = ?3, position = ?4, \
             visited_at = ?5, created_at = ?6, updated_at = ?7, version = ?8, json_data = ?9 \
             WHERE uuid = ?1",
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
            .execute_update("DELETE FROM pdf_bookanchor WHERE uuid = ?1", &[text(id)])?;
        if removed == 0 {
            return Ok(false);
        }
        self.ctx
            .emit_completed::<Bookanchor>(TABLE, TableAction::Delete, id, None);
        Ok(true)
    }

    fn query_by_id(&self, id: &str) -> Result<Option<Bookanchor>> {
        let row = self
            .ctx
            .executor
            .query_one(&format!("{SELECT} WHERE uuid = ?1"), &[text(id)])?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    fn query_all(&self) -> Result<Vec<Bookanchor>> {
        let rows = self
            .ctx
            .executor
            .execute_query(&format!("{SELECT} {ORDER}"), &[])?;
        rows_to_records(rows, "json_data")
    }
}
