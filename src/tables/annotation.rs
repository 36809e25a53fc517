use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::db::SqlValue;
use crate::error::{Result, StoreError};
use crate::events::TableAction;
use crate::models::{Annotation, AnnotationComment};
use crate::plugin::{
    PluginContext, RecordTable, TablePlugin, merge_for_update, payload_json, row_to_record,
    rows_to_records,
};
use crate::tables::{follow_pdf_deletes, pdf_delete_topic, pdf_info, text};
use crate::utils::now_ms;

const TABLE: &str = "pdf_annotation";
const VERSION: &str = "1.0.0";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pdf_annotation (
    ann_id TEXT PRIMARY KEY NOT NULL,
    pdf_uuid TEXT NOT NULL REFERENCES pdf_info(uuid) ON DELETE CASCADE,
    type TEXT NOT NULL CHECK (type IN ('screenshot', 'text-highlight', 'comment')),
    page_number INTEGER NOT NULL CHECK (page_number >= 1),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    json_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(json_data))
);

CREATE INDEX IF NOT EXISTS idx_pdf_annotation_pdf ON pdf_annotation(pdf_uuid);
CREATE INDEX IF NOT EXISTS idx_pdf_annotation_page ON pdf_annotation(pdf_uuid, page_number);
CREATE INDEX IF NOT EXISTS idx_pdf_annotation_type ON pdf_annotation(type);
"#;

const SELECT: &str = "SELECT ann_id, pdf_uuid, type, page_number, created_at, updated_at, version, \
                      json_data FROM pdf_annotation";
const ORDER: &str = "ORDER BY page_number ASC, created_at ASC, ann_id ASC";

#[derive(Clone)]
pub struct AnnotationTable {
    ctx: PluginContext,
}

impl AnnotationTable {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    pub fn query_by_pdf(&self, pdf_uuid: &str) -> Result<Vec<Annotation>> {
        self.select_where("pdf_uuid = ?1", &[text(pdf_uuid)])
    }

    pub fn query_by_page(&self, pdf_uuid: &str, page_number: i64) -> Result<Vec<Annotation>> {
        self.select_where(
            "pdf_uuid = ?1 AND page_number = ?2",
            &[text(pdf_uuid), SqlValue::Integer(page_number)],
        )
    }

    /// Annotations of one type (`screenshot`, `text-highlight`, `comment`).
    pub fn query_by_type(&self, pdf_uuid: &str, type_name: &str) -> Result<Vec<Annotation>> {
        self.select_where(
            "pdf_uuid = ?1 AND type = ?2",
            &[text(pdf_uuid), text(type_name)],
        )
    }

    pub fn count_by_pdf(&self, pdf_uuid: &str) -> Result<i64> {
        self.ctx.executor.query_i64(
            "SELECT COUNT(*) FROM pdf_annotation WHERE pdf_uuid = ?1",
            &[text(pdf_uuid)],
        )
    }

    /// Appends a reply to the annotation's thread and returns its id.
    pub fn add_comment(&self, ann_id: &str, content: &str) -> Result<String> {
        if content.trim().is_empty() {
            return Err(StoreError::validation("comment content must not be empty"));
        }
        self.ctx.transactions.transaction(|| {
            let current = self.require(ann_id)?;
            let comment = AnnotationComment {
                id: Uuid::new_v4().to_string(),
                content: content.to_string(),
                created_at: now_ms(),
            };
            let mut comments = current.comments;
            comments.push(comment.clone());
            self.update(ann_id, &json!({ "comments": comments }))?;
            Ok(comment.id)
        })
    }

    /// Removes a reply. Returns false when the annotation has no such comment.
    pub fn remove_comment(&self, ann_id: &str, comment_id: &str) -> Result<bool> {
        self.ctx.transactions.transaction(|| {
            let current = self.require(ann_id)?;
            let before = current.comments.len();
            let comments: Vec<AnnotationComment> = current
                .comments
                .into_iter()
                .filter(|c| c.id != comment_id)
                .collect();
            if comments.len() == before {
                return Ok(false);
            }
            self.update(ann_id, &json!({ "comments": comments }))?;
            Ok(true)
        })
    }

    /// Removes every annotation of a PDF.
    pub fn delete_by_pdf(&self, pdf_uuid: &str) -> Result<usize> {
        self.ctx.executor.execute_update(
            "DELETE FROM pdf_annotation WHERE pdf_uuid = ?1",
            &[text(pdf_uuid)],
        )
    }

    fn select_where(&self, clause: &str, params: &[SqlValue]) -> Result<Vec<Annotation>> {
        let rows = self
            .ctx
            .executor
            .execute_query(&format!("{SELECT} WHERE {clause} {ORDER}"), params)?;
        rows_to_records(rows, "json_data")
    }

    fn require(&self, ann_id: &str) -> Result<Annotation> {
        self.query_by_id(ann_id)?
            .ok_or_else(|| StoreError::validation(format!("annotation not found: {ann_id}")))
    }

    fn params(record: &Annotation) -> Result<Vec<SqlValue>> {
        Ok(vec![
            text(record.ann_id.clone()),
            text(record.pdf_uuid.clone()),
            text(record.body.type_name()),
            SqlValue::Integer(record.page_number),
            SqlValue::Integer(record.created_at),
            SqlValue::Integer(record.updated_at),
            SqlValue::Integer(record.version),
            text(payload_json(record, Annotation::COLUMNS)?),
        ])
    }
}

impl TablePlugin for AnnotationTable {
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
            .query_i64("SELECT COUNT(*) FROM pdf_annotation", &[])
    }
}

impl RecordTable for AnnotationTable {
    type Record = Annotation;

    fn validate_data(&self, raw: &Value) -> Result<Annotation> {
        Annotation::validate(raw, now_ms())
    }

    fn insert(&self, raw: &Value) -> Result<String> {
        let record = self.validate_data(raw)?;
        self.ctx.executor.execute_update(
            "INSERT INTO pdf_annotation (ann_id, pdf_uuid, type, page_number, created_at, \
             updated_at, version, json_data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            &Self::params(&record)?,
        )?;
        info!(ann_id = %record.ann_id, pdf_uuid = %record.pdf_uuid, "annotation inserted");
        self.ctx
            .emit_completed(TABLE, TableAction::Create, &record.ann_id, Some(&record));
        Ok(record.ann_id)
    }

    fn update(&self, id: &str, changes: &Value) -> Result<Annotation> {
        let current = self.require(id)?;
        let merged = merge_for_update(&current, changes, "ann_id", now_ms())?;
        let record = self.validate_data(&merged)?;
        self.ctx.executor.execute_update(
            "UPDATE pdf_annotation SET pdf_uuid = ?2, type = ?3, page_number = ?4, \
             created_at = ?5, updated_at = ?6, version = ?7, json_data = ?8 WHERE ann_id = ?1",
            &Self::params(&record)?,
        )?;
        self.ctx
            .emit_completed(TABLE, TableAction::Update, &record.ann_id, Some(&record));
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .ctx
            .executor
            .execute_update("DELETE FROM pdf_annotation WHERE ann_id = ?1", &[text(id)])?;
        if removed == 0 {
            return Ok(false);
        }
        self.ctx
            .emit_completed::<Annotation>(TABLE, TableAction::Delete, id, None);
        Ok(true)
    }

    fn query_by_id(&self, id: &str) -> Result<Option<Annotation>> {
        let row = self
            .ctx
            .executor
            .query_one(&format!("{SELECT} WHERE ann_id = ?1"), &[text(id)])?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    fn query_all(&self) -> Result<Vec<Annotation>> {
        let rows = self
            .ctx
            .executor
            .execute_query(&format!("{SELECT} {ORDER}"), &[])?;
        rows_to_records(rows, "json_data")
    }
}
