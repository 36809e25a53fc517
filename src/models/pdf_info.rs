use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{IdKind, check_timestamps, decode, normalize_tags, require_non_negative, stamped};
use crate::error::{Result, StoreError};

fn default_visible() -> bool {
    true
}

/// Metadata for one PDF file.
///
/// `uuid` doubles as the file's stem: `filename` is always `<uuid>.pdf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfInfo {
    pub uuid: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub page_count: i64,
    /// Size in bytes.
    #[serde(default)]
    pub file_size: i64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub visited_at: Option<i64>,
    pub version: i64,

    pub filename: String,
    #[serde(default)]
    pub filepath: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub thumbnail_path: Option<String>,
    /// Insertion order is preserved.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
    /// 0 (unrated) to 5.
    #[serde(default)]
    pub rating: i64,
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    /// Accumulated reading time in seconds.
    #[serde(default)]
    pub total_reading_time: i64,
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub last_accessed_at: Option<i64>,
    #[serde(default)]
    pub review_count: i64,
}

impl PdfInfo {
    /// Columns stored outside the JSON payload.
    pub const COLUMNS: &'static [&'static str] = &[
        "uuid",
        "title",
        "author",
        "page_count",
        "file_size",
        "created_at",
        "updated_at",
        "visited_at",
        "version",
    ];

    /// Builds a normalized record from a raw payload.
    ///
    /// A missing `uuid` is taken from the stem of `filename`.
    pub fn validate(raw: &Value, now: i64) -> Result<Self> {
        let mut fields = stamped(raw, "pdf_info", now)?;
        if matches!(fields.get("uuid"), None | Some(Value::Null))
            && let Some(stem) = fields
                .get("filename")
                .and_then(Value::as_str)
                .and_then(|f| f.strip_suffix(".pdf"))
        {
            fields.insert("uuid".into(), Value::from(stem));
        }

        let mut record: PdfInfo = decode(fields, "pdf_info")?;
        record.check()?;
        record.tags = normalize_tags(&record.tags, "pdf_info")?;
        Ok(record)
    }

    fn check(&self) -> Result<()> {
        IdKind::PdfUuid.check(&self.uuid)?;
        let expected = format!("{}.pdf", self.uuid);
        if self.filename != expected {
            return Err(StoreError::validation(format!(
                "filename must be {expected:?}, got {:?}",
                self.filename
            )));
        }
        if !(0..=5).contains(&self.rating) {
            return Err(StoreError::validation(format!(
                "rating must be between 0 and 5, got {}",
                self.rating
            )));
        }
        require_non_negative(self.page_count, "page_count")?;
        require_non_negative(self.file_size, "file_size")?;
        require_non_negative(self.total_reading_time, "total_reading_time")?;
        require_non_negative(self.review_count, "review_count")?;
        check_timestamps(self.created_at, self.updated_at, self.version, "pdf_info")
    }
}
