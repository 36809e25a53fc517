//! Bookmark trees.
//!
//! Each node is stored twice: embedded in its parent's `children` and as
//! its own row. The rows are the source of truth for tree reconstruction;
//! `parentId` links them.

use std::collections::{HashMap, HashSet};

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::db::SqlValue;
use crate::error::{Result, StoreError};
use crate::events::TableAction;
use crate::models::{Bookmark, FlatBookmark};
use crate::plugin::{
    PluginContext, RecordTable, TablePlugin, expect_object, merge_for_update, payload_json,
    row_to_record, rows_to_records,
};
use crate::tables::{follow_pdf_deletes, pdf_delete_topic, pdf_info, text};
use crate::utils::now_ms;

const TABLE: &str = "pdf_bookmark";
const VERSION: &str = "1.0.0";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pdf_bookmark (
    bookmark_id TEXT PRIMARY KEY NOT NULL,
    pdf_uuid TEXT NOT NULL REFERENCES pdf_info(uuid) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    json_data TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(json_data))
);

CREATE INDEX IF NOT EXISTS idx_pdf_bookmark_pdf ON pdf_bookmark(pdf_uuid);
CREATE INDEX IF NOT EXISTS idx_pdf_bookmark_page ON pdf_bookmark(json_extract(json_data, '$.pageNumber'));
CREATE INDEX IF NOT EXISTS idx_pdf_bookmark_parent ON pdf_bookmark(json_extract(json_data, '$.parentId'));
"#;

const SELECT: &str =
    "SELECT bookmark_id, pdf_uuid, created_at, updated_at, version, json_data FROM pdf_bookmark";
const ORDER: &str =
    "ORDER BY json_extract(json_data, '$.order') ASC, created_at ASC, bookmark_id ASC";

#[derive(Clone)]
pub struct BookmarkTable {
    ctx: PluginContext,
}

impl BookmarkTable {
    pub fn new(ctx: PluginContext) -> Self {
        Self { ctx }
    }

    /// Every bookmark row of a PDF, sorted by `order`.
    pub fn query_by_pdf(&self, pdf_uuid: &str) -> Result<Vec<Bookmark>> {
        let rows = self.ctx.executor.execute_query(
            &format!("{SELECT} WHERE pdf_uuid = ?1 {ORDER}"),
            &[text(pdf_uuid)],
        )?;
        rows_to_records(rows, "json_data")
    }

    /// Rebuilds a PDF's bookmark tree from its rows and returns it in
    /// pre-order with each entry's depth.
    ///
    /// Rows whose parent is missing are treated as roots. Rows caught in a
    /// `parentId` cycle are emitted once, after the reachable tree.
    pub fn flatten_bookmarks(&self, pdf_uuid: &str) -> Result<Vec<FlatBookmark>> {
        let rows = self.query_by_pdf(pdf_uuid)?;
        let index: HashMap<String, usize> = rows
            .iter()
            .enumerate()
            .map(|(i, b)| (b.bookmark_id.clone(), i))
            .collect();

        let mut roots = Vec::new();
        let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
        for (i, bookmark) in rows.iter().enumerate() {
            match bookmark.parent_id.as_ref().and_then(|p| index.get(p)) {
                Some(&parent) if parent != i => children.entry(parent).or_default().push(i),
                _ => roots.push(i),
            }
        }
        // Rows arrive sorted by order, so each sibling list already is

        let mut arena: Vec<Option<Bookmark>> = rows.into_iter().map(Some).collect();
        let mut visited = HashSet::new();
        let mut out = Vec::with_capacity(arena.len());

        let starts: Vec<usize> = roots.into_iter().chain(0..arena.len()).collect();
        for start in starts {
            let mut stack = vec![(start, 0usize)];
            while let Some((node, level)) = stack.pop() {
                if !visited.insert(node) {
                    continue;
                }
                if let Some(bookmark) = arena[node].take() {
                    out.push(FlatBookmark { level, bookmark });
                }
                if let Some(kids) = children.get(&node) {
                    stack.extend(kids.iter().rev().map(|&k| (k, level + 1)));
                }
            }
        }
        Ok(out)
    }

    /// Sets each bookmark's `order` to its index in `ids` and re-sorts the
    /// matching entries in their parents' embedded children.
    pub fn reorder_bookmarks(&self, ids: &[String]) -> Result<()> {
        self.ctx.transactions.transaction(|| {
            let mut parents: Vec<String> = Vec::new();
            for (position, id) in ids.iter().enumerate() {
                let updated = self.update(id, &json!({ "order": position }))?;
                if let Some(parent) = updated.parent_id
                    && !parents.contains(&parent)
                {
                    parents.push(parent);
                }
            }

            for parent_id in parents {
                let Some(parent) = self.query_by_id(&parent_id)? else {
                    continue;
                };
                let mut kids = parent.children.clone();
                for kid in &mut kids {
                    if let Some(position) = ids.iter().position(|id| *id == kid.id) {
                        kid.order = position as i64;
                    }
                }
                kids.sort_by_key(|k| k.order);
                if kids != parent.children {
                    self.update(&parent_id, &json!({ "children": kids }))?;
                }
            }
            Ok(())
        })
    }

    /// Adds a child under `parent_id`: embedded in the parent and stored as
    /// rows. Returns the child's id.
    pub fn add_child_bookmark(&self, parent_id: &str, child: &Value) -> Result<String> {
        self.ctx.transactions.transaction(|| {
            let parent = self.require(parent_id)?;
            let mut raw = expect_object(child, "bookmark")?.clone();
            if let Some(given) = raw.get("parentId").and_then(Value::as_str)
                && given != parent_id
            {
                return Err(StoreError::validation(format!(
                    "child parentId {given} does not match {parent_id}"
                )));
            }
            raw.insert("pdf_uuid".into(), Value::from(parent.pdf_uuid.clone()));
            raw.insert("parentId".into(), Value::from(parent_id));
            if let Some(id) = raw.remove("id") {
                raw.entry("bookmark_id").or_insert(id);
            }

            let record = Bookmark::validate(&Value::Object(raw), parent.children.len(), now_ms())?;
            let mut kids = parent.children;
            kids.push(record.to_node());
            self.update(parent_id, &json!({ "children": kids }))?;
            self.insert_rows(&record)?;
            Ok(record.bookmark_id)
        })
    }

    /// Detaches `child_id` from its parent and deletes it with its subtree.
    /// Returns false when the parent has no such child.
    pub fn remove_child_bookmark(&self, parent_id: &str, child_id: &str) -> Result<bool> {
        self.ctx.transactions.transaction(|| {
            let parent = self.require(parent_id)?;
            let mut kids = parent.children;
            let Some(position) = kids.iter().position(|k| k.id == child_id) else {
                return Ok(false);
            };
            kids.remove(position);
            self.update(parent_id, &json!({ "children": kids }))?;
            self.delete_subtree(child_id)?;
            Ok(true)
        })
    }

    /// Replaces a PDF's whole bookmark tree. Returns the root ids.
    pub fn save_bookmarks(&self, pdf_uuid: &str, roots: &[Value]) -> Result<Vec<String>> {
        self.ctx.transactions.transaction(|| {
            self.delete_by_pdf(pdf_uuid)?;
            let now = now_ms();
            let mut ids = Vec::with_capacity(roots.len());
            for (position, raw) in roots.iter().enumerate() {
                let mut fields = expect_object(raw, "bookmark")?.clone();
                fields.insert("pdf_uuid".into(), Value::from(pdf_uuid));
                let record = Bookmark::validate(&Value::Object(fields), position, now)?;
                if record.parent_id.is_some() {
                    return Err(StoreError::validation("root bookmarks must not have a parentId"));
                }
                self.insert_rows(&record)?;
                ids.push(record.bookmark_id);
            }
            info!(pdf_uuid, roots = ids.len(), "bookmarks saved");
            Ok(ids)
        })
    }

    pub fn delete_by_pdf(&self, pdf_uuid: &str) -> Result<usize> {
        self.ctx.executor.execute_update(
            "DELETE FROM pdf_bookmark WHERE pdf_uuid = ?1",
            &[text(pdf_uuid)],
        )
    }

    /// Stores `record` and every embedded descendant as rows, atomically.
    fn insert_rows(&self, record: &Bookmark) -> Result<()> {
        let mut rows = vec![record.clone()];
        rows.extend(
            record
                .descendants()
                .into_iter()
                .map(|node| Bookmark::from_node(node, &record.pdf_uuid, record.created_at)),
        );
        let param_sets = rows
            .iter()
            .map(Self::params)
            .collect::<Result<Vec<_>>>()?;

        self.ctx.transactions.transaction(|| {
            self.ctx.executor.execute_batch(
                "INSERT INTO pdf_bookmark (bookmark_id, pdf_uuid, created_at, updated_at, \
                 version, json_data) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                &param_sets,
            )
        })?;

        for row in &rows {
            self.ctx
                .emit_completed(TABLE, TableAction::Create, &row.bookmark_id, Some(row));
        }
        Ok(())
    }

    /// Deletes a bookmark row and every row below it.
    fn delete_subtree(&self, bookmark_id: &str) -> Result<usize> {
        let Some(root) = self.query_by_id(bookmark_id)? else {
            return Ok(0);
        };
        let rows = self.query_by_pdf(&root.pdf_uuid)?;

        let mut doomed = vec![root.bookmark_id.clone()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor].clone();
            for row in &rows {
                if row.parent_id.as_deref() == Some(current.as_str())
                    && !doomed.contains(&row.bookmark_id)
                {
                    doomed.push(row.bookmark_id.clone());
                }
            }
            cursor += 1;
        }

        let param_sets: Vec<Vec<SqlValue>> = doomed.iter().map(|id| vec![text(id.clone())]).collect();
        let removed = self.ctx.transactions.transaction(|| {
            self.ctx
                .executor
                .execute_batch("DELETE FROM pdf_bookmark WHERE bookmark_id = ?1", &param_sets)
        })?;
        for id in &doomed {
            self.ctx
                .emit_completed::<Bookmark>(TABLE, TableAction::Delete, id, None);
        }
        Ok(removed)
    }

    fn sync_parent(&self, record: &Bookmark) -> Result<()> {
        let Some(parent_id) = &record.parent_id else {
            return Ok(());
        };
        // A parent embedded below its own child is a cycle; leave it alone
        if record.descendants().iter().any(|n| n.id == *parent_id) {
            return Ok(());
        }
        let Some(parent) = self.query_by_id(parent_id)? else {
            return Ok(());
        };
        let node = record.to_node();
        let mut kids = parent.children;
        let Some(slot) = kids.iter_mut().find(|k| k.id == node.id) else {
            return Ok(());
        };
        if *slot == node {
            return Ok(());
        }
        *slot = node;
        self.update(parent_id, &json!({ "children": kids }))?;
        Ok(())
    }

    fn require(&self, bookmark_id: &str) -> Result<Bookmark> {
        self.query_by_id(bookmark_id)?
            .ok_or_else(|| StoreError::validation(format!("bookmark not found: {bookmark_id}")))
    }

    fn params(record: &Bookmark) -> Result<Vec<SqlValue>> {
        Ok(vec![
            text(record.bookmark_id.clone()),
            text(record.pdf_uuid.clone()),
            SqlValue::Integer(record.created_at),
            SqlValue::Integer(record.updated_at),
            SqlValue::Integer(record.version),
            text(payload_json(record, Bookmark::COLUMNS)?),
        ])
    }
}

impl TablePlugin for BookmarkTable {
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
            .query_i64("SELECT COUNT(*) FROM pdf_bookmark", &[])
    }
}

impl RecordTable for BookmarkTable {
    type Record = Bookmark;

    fn validate_data(&self, raw: &Value) -> Result<Bookmark> {
        Bookmark::validate(raw, 0, now_ms())
    }

    /// Stores a bookmark and its whole embedded subtree. Without an explicit
    /// `order` the bookmark goes after its existing siblings.
    fn insert(&self, raw: &Value) -> Result<String> {
        let mut record = self.validate_data(raw)?;
        if matches!(raw.get("order"), None | Some(Value::Null)) {
            let siblings = self
                .query_by_pdf(&record.pdf_uuid)?
                .into_iter()
                .filter(|b| b.parent_id == record.parent_id)
                .count();
            record.order = siblings as i64;
        }
        if let Some(parent) = &record.parent_id
            && self.query_by_id(parent)?.is_none()
        {
            warn!(bookmark_id = %record.bookmark_id, parent = %parent, "bookmark parent not found; stored as root");
        }
        self.insert_rows(&record)?;
        Ok(record.bookmark_id)
    }

    /// Updates the row and refreshes its entry in the parent's embedded
    /// children, which in turn refreshes the grandparent.
    fn update(&self, id: &str, changes: &Value) -> Result<Bookmark> {
        self.ctx.transactions.transaction(|| {
            let current = self.require(id)?;
            let merged = merge_for_update(&current, changes, "bookmark_id", now_ms())?;
            let record = self.validate_data(&merged)?;
            self.ctx.executor.execute_update(
                "UPDATE pdf_bookmark SET pdf_uuid = ?2, created_at = ?3, updated_at = ?4, \
                 version = ?5, json_data = ?6 WHERE bookmark_id = ?1",
                &Self::params(&record)?,
            )?;
            self.ctx
                .emit_completed(TABLE, TableAction::Update, &record.bookmark_id, Some(&record));
            self.sync_parent(&record)?;
            Ok(record)
        })
    }

    /// Deletes the bookmark and its descendants, detaching it from its
    /// parent's embedded children first.
    fn delete(&self, id: &str) -> Result<bool> {
        let Some(bookmark) = self.query_by_id(id)? else {
            return Ok(false);
        };
        if let Some(parent_id) = &bookmark.parent_id
            && let Some(parent) = self.query_by_id(parent_id)?
            && parent.children.iter().any(|k| k.id == id)
        {
            return self.remove_child_bookmark(parent_id, id);
        }
        Ok(self.delete_subtree(id)? > 0)
    }

    fn query_by_id(&self, id: &str) -> Result<Option<Bookmark>> {
        let row = self
            .ctx
            .executor
            .query_one(&format!("{SELECT} WHERE bookmark_id = ?1"), &[text(id)])?;
        row.map(|r| row_to_record(r, "json_data")).transpose()
    }

    fn query_all(&self) -> Result<Vec<Bookmark>> {
        let rows = self
            .ctx
            .executor
            .execute_query(&format!("{SELECT} {ORDER}"), &[])?;
        rows_to_records(rows, "json_data")
    }
}
