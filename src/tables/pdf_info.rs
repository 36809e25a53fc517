//! PDF metadata table: the aggregate root every other resource hangs off.

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::db::SqlValue;
use crate::error::{Result, StoreError};
use crate::events::TableAction;
use crate::models::PdfInfo;
use crate::plugin::{
    PluginContext, RecordTable, TablePlugin, merge_for_update, payload_json, row_to_record,
    rows_to_records,
};
use crate::query::{
    self, Condition, DEFAULT_ORDER_BY, FieldOperator, SearchRequest, sort_records,
};
use crate::tables::{optional_int, text};
use crate::utils::now_ms;

pub(crate) const TABLE: &str = "pdf_info";
const VERSION: &str = "1.0.0";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pdf_info (
    uuid TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    page_count INTEGER NOT NULL DEFAULT 0,
    file_size INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    visited_at INTEGER,
    version INTEGER NOT NULL DEFAULT 1,
    json_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(json_data))
);

CREATE INDEX IF NOT EXISTS idx_pdf_info_title ON pdf_info(title);
CREATE INDEX IF NOT EXISTS idx_pdf_info_updated ON pdf_info(updated_at);

-- Expression indexes over payload fields used by common lookups
CREATE INDEX IF NOT EXISTS idx_pdf_info_filename ON pdf_info(json_extract(json_data, '$.filename'));
CREATE INDEX IF NOT EXISTS idx_pdf_info_rating ON pdf_info(json_extract(json_data, '$.rating'));
CREATE INDEX IF NOT EXISTS idx_pdf_info_visible ON pdf_info(json_extract(json_data, '$.is_visible'));
"#;

const SELECT: &str = "SELECT uuid, title, author, page_count, file_size, created_at, updated_at, \
                      visited_at, version, json_data FROM pdf_info";

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub records: Vec<PdfInfo>,
    /// Matches before `limit`/`offset` were applied.
    pub total: usize,
}

#[derive(Clone)]
pub struct PdfInfoTable {
    ctx: PluginContext,
}

impl PdfInfoTable {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    pub fn query_by_filename(&self, filename: &str) -> Result<Option<PdfInfo>> {
        let row = self.ctx.executor.query_one(
            &format!("{SELECT} WHERE json_extract(json_data, '$.filename') = ?1"),
            &[text(filename)],
        )?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    pub fn query_visible(&self) -> Result<Vec<PdfInfo>> {
        let rows = self.ctx.executor.execute_query(
            &format!(
                "{SELECT} WHERE json_extract(json_data, '$.is_visible') = 1 ORDER BY {DEFAULT_ORDER_BY}"
            ),
            &[],
        )?;
        rows_to_records(rows, "json_data")
    }

    /// Records carrying exactly `tag` (element match, not substring).
    pub fn query_by_tag(&self, tag: &str) -> Result<Vec<PdfInfo>> {
        let request = SearchRequest::default().with_filter(Condition::field(
            "tags",
            FieldOperator::Contains,
            Value::from(tag),
        ));
        Ok(self.search(&request)?.records)
    }

    /// Appends `tag` unless it is already present.
    pub fn add_tag(&self, uuid: &str, tag: &str) -> Result<PdfInfo> {
        self.ctx.transactions.transaction(|| {
            let current = self.require(uuid)?;
            let mut tags = current.tags.clone();
            let tag = tag.trim();
            if tags.iter().any(|t| t == tag) {
                return Ok(current);
            }
            tags.push(tag.to_string());
            self.update(uuid, &json!({ "tags": tags }))
        })
    }

    pub fn remove_tag(&self, uuid: &str, tag: &str) -> Result<PdfInfo> {
        self.ctx.transactions.transaction(|| {
            let current = self.require(uuid)?;
            let tags: Vec<&String> = current.tags.iter().filter(|t| *t != tag.trim()).collect();
            if tags.len() == current.tags.len() {
                return Ok(current);
            }
            self.update(uuid, &json!({ "tags": tags }))
        })
    }

    /// Stamps `visited_at` and `last_accessed_at` with the current time.
    pub fn mark_visited(&self, uuid: &str) -> Result<PdfInfo> {
        let now = now_ms();
        self.update(uuid, &json!({ "visited_at": now, "last_accessed_at": now }))
    }

    /// Adds `seconds` to the accumulated reading time.
    pub fn update_reading_stats(&self, uuid: &str, seconds: i64) -> Result<PdfInfo> {
        if seconds < 0 {
            return Err(StoreError::validation(format!(
                "reading time must be >= 0 seconds, got {seconds}"
            )));
        }
        self.ctx.transactions.transaction(|| {
            let current = self.require(uuid)?;
            self.update(
                uuid,
                &json!({
                    "total_reading_time": current.total_reading_time + seconds,
                    "last_accessed_at": now_ms(),
                }),
            )
        })
    }

    /// Counts one review and sets the next due date.
    pub fn record_review(&self, uuid: &str, next_due: Option<i64>) -> Result<PdfInfo> {
        self.ctx.transactions.transaction(|| {
            let current = self.require(uuid)?;
            self.update(
                uuid,
                &json!({
                    "review_count": current.review_count + 1,
                    "due_date": next_due,
                }),
            )
        })
    }

    /// Records matching every token in at least one search field.
    pub fn search_records(&self, tokens: &[&str]) -> Result<Vec<PdfInfo>> {
        Ok(self.search(&SearchRequest::tokens(tokens.iter().copied()))?.records)
    }

    /// Runs a compiled search.
    ///
    /// Sorts SQL can express are pushed into `ORDER BY` together with
    /// paging; the rest are fetched in default order and sorted here.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let compiled = query::compile(request)?;
        let total = self.ctx.executor.query_i64(
            &format!("SELECT COUNT(*) FROM pdf_info WHERE {}", compiled.where_sql),
            &compiled.params,
        )? as usize;

        let records = match query::order_by_sql(&request.sort)? {
            Some(order_by) => {
                let mut sql = format!("{SELECT} WHERE {} ORDER BY {order_by}", compiled.where_sql);
                let mut params = compiled.params;
                if request.limit.is_some() || request.offset > 0 {
                    sql.push_str(" LIMIT ? OFFSET ?");
                    params.push(SqlValue::Integer(request.limit.map_or(-1, |l| l as i64)));
                    params.push(SqlValue::Integer(request.offset as i64));
                }
                rows_to_records(self.ctx.executor.execute_query(&sql, &params)?, "json_data")?
            }
            None => {
                let sql = format!(
                    "{SELECT} WHERE {} ORDER BY {DEFAULT_ORDER_BY}",
                    compiled.where_sql
                );
                let rows = self.ctx.executor.execute_query(&sql, &compiled.params)?;
                let sorted = sort_records(rows_to_records::<PdfInfo>(rows, "json_data")?, &request.sort, "uuid")?;
                sorted
                    .into_iter()
                    .skip(request.offset)
                    .take(request.limit.unwrap_or(usize::MAX))
                    .collect()
            }
        };

        debug!(total, returned = records.len(), "pdf search");
        Ok(SearchResults { records, total })
    }

    fn require(&self, uuid: &str) -> Result<PdfInfo> {
        self.query_by_id(uuid)?
            .ok_or_else(|| StoreError::validation(format!("pdf_info not found: {uuid}")))
    }

    fn params(record: &PdfInfo) -> Result<Vec<SqlValue>> {
        Ok(vec![
            text(record.uuid.clone()),
            text(record.title.clone()),
            text(record.author.clone()),
            SqlValue::Integer(record.page_count),
            SqlValue::Integer(record.file_size),
            SqlValue::Integer(record.created_at),
            SqlValue::Integer(record.updated_at),
            optional_int(record.visited_at),
            SqlValue::Integer(record.version),
            text(payload_json(record, PdfInfo::COLUMNS)?),
        ])
    }
}

impl TablePlugin for PdfInfoTable {
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
        self.ctx.executor.query_i64("SELECT COUNT(*) FROM pdf_info", &[])
    }
}

impl RecordTable for PdfInfoTable {
    type Record = PdfInfo;

    fn validate_data(&self, raw: &Value) -> Result<PdfInfo> {
        PdfInfo::validate(raw, now_ms())
    }

    fn insert(&self, raw: &Value) -> Result<String> {
        let record = self.validate_data(raw)?;
        self.ctx.executor.execute_update(
            "INSERT INTO pdf_info (uuid, title, author, page_count, file_size, created_at, \
             updated_at, visited_at, version, json_data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            &Self::params(&record)?,
        )?;
        info!(uuid = %record.uuid, "pdf_info inserted");
        self.ctx
            .emit_completed(TABLE, TableAction::Create, &record.uuid, Some(&record));
        Ok(record.uuid)
    }

    fn update(&self, id: &str, changes: &Value) -> Result<PdfInfo> {
        let current = self.require(id)?;
        let merged = merge_for_update(&current, changes, "uuid", now_ms())?;
        let record = self.validate_data(&merged)?;
        self.ctx.executor.execute_update(
            "UPDATE pdf_info SET title = ?2, author = ?3, page_count = ?4, file_size = ?5, \
             created_at = ?6, updated_at = ?7, visited_at = ?8, version = ?9, json_data = ?10 \
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
            .execute_update("DELETE FROM pdf_info WHERE uuid = ?1", &[text(id)])?;
        if removed == 0 {
            return Ok(false);
        }
        info!(uuid = id, "pdf_info deleted");
        self.ctx
            .emit_completed::<PdfInfo>(TABLE, TableAction::Delete, id, None);
        Ok(true)
    }

    fn query_by_id(&self, id: &str) -> Result<Option<PdfInfo>> {
        let row = self
            .ctx
            .executor
            .query_one(&format!("{SELECT} WHERE uuid = ?1"), &[text(id)])?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    fn query_all(&self) -> Result<Vec<PdfInfo>> {
        let rows = self
            .ctx
            .executor
            .execute_query(&format!("{SELECT} ORDER BY {DEFAULT_ORDER_BY}"), &[])?;
        rows_to_records(rows, "json_data")
    }
}
