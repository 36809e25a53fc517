//! Bookmark records and the recursive node validation behind them.
//!
//! A bookmark row embeds its subtree in `children`, and every node of that
//! subtree is also stored as its own row whose `parentId` points back up.
//! `parentId` is only a relation; trees are rebuilt from ids on read.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{IdKind, check_timestamps, decode, require_text, stamped};
use crate::error::{Result, StoreError};

const MAX_TREE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkKind {
    /// Jump to the top of a page
    Page,
    /// Jump to a scroll position and zoom on a page
    Region,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRegion {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub zoom: f64,
}

/// A node of an embedded bookmark tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BookmarkKind,
    pub page_number: i64,
    #[serde(default)]
    pub region: Option<BookmarkRegion>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub order: i64,
    #[serde(default)]
    pub children: Vec<BookmarkNode>,
}

/// A stored bookmark row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub bookmark_id: String,
    pub pdf_uuid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BookmarkKind,
    #[serde(rename = "pageNumber")]
    pub page_number: i64,
    #[serde(default)]
    pub region: Option<BookmarkRegion>,
    #[serde(rename = "parentId", default)]
    pub parent_id: Option<String>,
    pub order: i64,
    #[serde(default)]
    pub children: Vec<BookmarkNode>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
}

/// One entry of a flattened tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatBookmark {
    /// Depth below the root, starting at 0.
    pub level: usize,
    #[serde(flatten)]
    pub bookmark: Bookmark,
}

impl Bookmark {
    pub const COLUMNS: &'static [&'static str] =
        &["bookmark_id", "pdf_uuid", "created_at", "updated_at", "version"];

    /// Builds a normalized bookmark and its embedded subtree.
    ///
    /// `position` is the default `order` when the payload has none. Node ids
    /// are generated where missing and must be unique within the tree.
    pub fn validate(raw: &Value, position: usize, now: i64) -> Result<Self> {
        let mut fields = stamped(raw, "bookmark", now)?;
        let bookmark_id = IdKind::Bookmark
            .check_or_generate(fields.get("bookmark_id").and_then(Value::as_str))?;
        fields.insert("bookmark_id".into(), Value::from(bookmark_id.clone()));
        default_order(&mut fields, position);

        let mut seen = HashSet::from([bookmark_id.clone()]);
        let children = normalize_children(&fields, &bookmark_id, &mut seen, 1)?;
        fields.insert("children".into(), children);

        let record: Bookmark = decode(fields, "bookmark")?;
        IdKind::PdfUuid.check(&record.pdf_uuid)?;
        check_node_fields(&record.name, record.kind, record.page_number, record.region, record.order)?;
        if record.parent_id.as_deref() == Some(record.bookmark_id.as_str()) {
            return Err(StoreError::validation("bookmark cannot be its own parent"));
        }
        check_timestamps(record.created_at, record.updated_at, record.version, "bookmark")?;
        Ok(record)
    }

    /// The row for an embedded node, stored alongside its ancestors.
    pub fn from_node(node: &BookmarkNode, pdf_uuid: &str, now: i64) -> Self {
        Self {
            bookmark_id: node.id.clone(),
            pdf_uuid: pdf_uuid.to_string(),
            name: node.name.clone(),
            kind: node.kind,
            page_number: node.page_number,
            region: node.region,
            parent_id: node.parent_id.clone(),
            order: node.order,
            children: node.children.clone(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// This bookmark as an embedded node.
    pub fn to_node(&self) -> BookmarkNode {
        BookmarkNode {
            id: self.bookmark_id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            page_number: self.page_number,
            region: self.region,
            parent_id: self.parent_id.clone(),
            order: self.order,
            children: self.children.clone(),
        }
    }

    /// Every node below this one, depth first.
    pub fn descendants(&self) -> Vec<&BookmarkNode> {
        let mut out = Vec::new();
        let mut stack: Vec<&BookmarkNode> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

fn default_order(fields: &mut Map<String, Value>, position: usize) {
    if matches!(fields.get("order"), None | Some(Value::Null)) {
        fields.insert("order".into(), Value::from(position as i64));
    }
}

/// Validates every child of `parent`, filling `id`, `parentId` and `order`.
fn normalize_children(
    parent: &Map<String, Value>,
    parent_id: &str,
    seen: &mut HashSet<String>,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_TREE_DEPTH {
        return Err(StoreError::validation("bookmark tree is nested too deeply"));
    }
    let raw_children = match parent.get("children") {
        None | Some(Value::Null) => return Ok(Value::Array(Vec::new())),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(StoreError::validation("bookmark children must be an array")),
    };

    let mut children = Vec::with_capacity(raw_children.len());
    for (position, raw) in raw_children.iter().enumerate() {
        let mut fields = raw
            .as_object()
            .ok_or_else(|| StoreError::validation("bookmark child must be an object"))?
            .clone();

        let id = IdKind::Bookmark.check_or_generate(fields.get("id").and_then(Value::as_str))?;
        if !seen.insert(id.clone()) {
            return Err(StoreError::validation(format!("duplicate bookmark id in tree: {id}")));
        }
        fields.insert("id".into(), Value::from(id.clone()));
        match fields.get("parentId") {
            None | Some(Value::Null) => {
                fields.insert("parentId".into(), Value::from(parent_id));
            }
            Some(given) if given.as_str() != Some(parent_id) => {
                return Err(StoreError::validation(format!(
                    "bookmark {id} has parentId {given} but is nested under {parent_id}"
                )));
            }
            Some(_) => {}
        }
        default_order(&mut fields, position);

        let grandchildren = normalize_children(&fields, &id, seen, depth + 1)?;
        fields.insert("children".into(), grandchildren);

        let node: BookmarkNode = decode(fields, "bookmark node")?;
        check_node_fields(&node.name, node.kind, node.page_number, node.region, node.order)?;
        children.push(serde_json::to_value(node)?);
    }
    Ok(Value::Array(children))
}

fn check_node_fields(
    name: &str,
    kind: BookmarkKind,
    page_number: i64,
    region: Option<BookmarkRegion>,
    order: i64,
) -> Result<()> {
    require_text(name, "bookmark.name")?;
    if page_number < 1 {
        return Err(StoreError::validation(format!(
            "bookmark pageNumber must be >= 1, got {page_number}"
        )));
    }
    if order < 0 {
        return Err(StoreError::validation("bookmark order must be >= 0"));
    }
    match (kind, region) {
        (BookmarkKind::Region, None) => {
            Err(StoreError::validation("region bookmarks require a region"))
        }
        (BookmarkKind::Region, Some(region)) if region.zoom <= 0.0 => {
            Err(StoreError::validation("bookmark region zoom must be positive"))
        }
        (BookmarkKind::Page, Some(_)) => {
            Err(StoreError::validation("page bookmarks must not carry a region"))
        }
        _ => Ok(()),
    }
}
