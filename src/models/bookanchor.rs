use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{IdKind, check_timestamps, decode, require_non_negative, require_text, stamped};
use crate::error::{Result, StoreError};

/// A saved reading position inside a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookanchor {
    pub uuid: String,
    pub pdf_uuid: String,
    /// 1-based page the anchor points at.
    pub page_at: i64,
    /// Vertical offset within the page, 0.0 (top) to 1.0 (bottom).
    #[serde(default)]
    pub position: f64,
    #[serde(default)]
    pub visited_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub use_count: i64,
}

impl Bookanchor {
    pub const COLUMNS: &'static [&'static str] = &[
        "uuid",
        "pdf_uuid",
        "page_at",
        "position",
        "visited_at",
        "created_at",
        "updated_at",
        "version",
    ];

    pub fn validate(raw: &Value, now: i64) -> Result<Self> {
        let mut fields = stamped(raw, "bookanchor", now)?;
        let uuid = IdKind::Anchor.check_or_generate(fields.get("uuid").and_then(Value::as_str))?;
        fields.insert("uuid".into(), Value::from(uuid));

        let record: Bookanchor = decode(fields, "bookanchor")?;
        IdKind::PdfUuid.check(&record.pdf_uuid)?;
        require_text(&record.name, "bookanchor.name")?;
        if record.page_at < 1 {
            return Err(StoreError::validation(format!(
                "page_at must be >= 1, got {}",
                record.page_at
            )));
        }
        if !(0.0..=1.0).contains(&record.position) {
            return Err(StoreError::validation(format!(
                "position must be between 0 and 1, got {}",
                record.position
            )));
        }
        require_non_negative(record.use_count, "use_count")?;
        check_timestamps(record.created_at, record.updated_at, record.version, "bookanchor")?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn anchor_gets_generated_id() {
        let anchor = Bookanchor::validate(
            &json!({"pdf_uuid": "0c251de0e2ac", "page_at": 4, "position": 0.5, "name": "resume here"}),
            10,
        )
        .unwrap();

        assert!(anchor.uuid.starts_with("pdfanchor-"));
        assert!(!anchor.is_active);
        assert_eq!(anchor.use_count, 0);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for raw in [
            json!({"pdf_uuid": "0c251de0e2ac", "page_at": 0, "name": "a"}),
            json!({"pdf_uuid": "0c251de0e2ac", "page_at": 1, "position": 1.5, "name": "a"}),
            json!({"pdf_uuid": "0c251de0e2ac", "page_at": 1, "name": ""}),
            json!({"pdf_uuid": "0c251de0e2ac", "page_at": 1, "name": "a", "uuid": "anchor-1"}),
            json!({"pdf_uuid": "bad", "page_at": 1, "name": "a"}),
        ] {
            assert!(Bookanchor::validate(&raw, 1).is_err(), "{raw} should be rejected");
        }
    }
}
