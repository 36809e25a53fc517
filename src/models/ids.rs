//! Identifier formats for every stored resource.
//!
//! Each resource has its own textual key shape; these helpers generate
//! fresh keys and check incoming ones.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::utils::now_ms;

static PDF_UUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{12}$").expect("valid pdf uuid pattern"));
static ANNOTATION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ann_\d+_[A-Za-z0-9]{6}$").expect("valid annotation pattern"));
static BOOKMARK_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^bookmark-\d+-[A-Za-z0-9]+$").expect("valid bookmark pattern"));
static ANCHOR_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pdfanchor-[0-9a-f]{12}$").expect("valid anchor pattern"));

/// The kinds of keys the store hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// 12 lowercase hex characters
    PdfUuid,
    /// `ann_<digits>_<6 alphanumeric>`
    Annotation,
    /// `bookmark-<digits>-<token>`
    Bookmark,
    /// `pdfanchor-<12 hex>`
    Anchor,
    /// Any non-blank string (search conditions use hyphenated v4 UUIDs)
    SearchCondition,
}

impl IdKind {
    /// Human readable name used in validation messages.
    pub fn label(self) -> &'static str {
        match self {
            IdKind::PdfUuid => "pdf uuid",
            IdKind::Annotation => "annotation id",
            IdKind::Bookmark => "bookmark id",
            IdKind::Anchor => "anchor id",
            IdKind::SearchCondition => "search condition id",
        }
    }

    /// Returns true when `id` has this kind's shape.
    pub fn matches(self, id: &str) -> bool {
        match self {
            IdKind::PdfUuid => PDF_UUID.is_match(id),
            IdKind::Annotation => ANNOTATION_ID.is_match(id),
            IdKind::Bookmark => BOOKMARK_ID.is_match(id),
            IdKind::Anchor => ANCHOR_ID.is_match(id),
            IdKind::SearchCondition => !id.trim().is_empty(),
        }
    }

    /// Generates a fresh key of this kind.
    pub fn generate(self) -> String {
        let hex = Uuid::new_v4().simple().to_string();
        match self {
            IdKind::PdfUuid => hex[..12].to_string(),
            IdKind::Annotation => format!("ann_{}_{}", now_ms(), &hex[..6]),
            IdKind::Bookmark => format!("bookmark-{}-{}", now_ms(), &hex[..9]),
            IdKind::Anchor => format!("pdfanchor-{}", &hex[..12]),
            IdKind::SearchCondition => Uuid::new_v4().to_string(),
        }
    }

    /// Returns `id` unchanged or a validation error naming the expected shape.
    pub fn check(self, id: &str) -> Result<()> {
        if self.matches(id) {
            Ok(())
        } else {
            Err(StoreError::validation(format!(
                "invalid {}: {id:?}",
                self.label()
            )))
        }
    }

    /// Checks `id` when present, otherwise generates a new one.
    pub fn check_or_generate(self, id: Option<&str>) -> Result<String> {
        match id {
            Some(id) => self.check(id).map(|()| id.to_string()),
            None => Ok(self.generate()),
        }
    }
}
