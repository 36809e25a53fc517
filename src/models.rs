mod annotation;
mod bookanchor;
mod bookmark;
mod ids;
mod pdf_info;
mod search_condition;

pub use annotation::{
    Annotation, AnnotationBody, AnnotationComment, CommentNote, Point, Rect, Screenshot,
    TextHighlight, TextRange,
};
pub use bookanchor::Bookanchor;
pub use bookmark::{Bookmark, BookmarkKind, BookmarkNode, BookmarkRegion, FlatBookmark};
pub use ids::IdKind;
pub use pdf_info::PdfInfo;
pub use search_condition::SearchCondition;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};
use crate::plugin::expect_object;

/// Copies `raw` into a mutable object and fills the shared bookkeeping
/// fields: `created_at` defaults to `now`, `updated_at` to `created_at`,
/// `version` to 1.
pub(crate) fn stamped(raw: &Value, what: &str, now: i64) -> Result<Map<String, Value>> {
    let mut fields = expect_object(raw, what)?.clone();
    let created_at = match fields.get("created_at") {
        Some(Value::Null) | None => now,
        Some(value) => value
            .as_i64()
            .ok_or_else(|| StoreError::validation(format!("{what}.created_at must be an integer")))?,
    };
    fields.insert("created_at".into(), Value::from(created_at));
    if matches!(fields.get("updated_at"), None | Some(Value::Null)) {
        fields.insert("updated_at".into(), Value::from(created_at));
    }
    if matches!(fields.get("version"), None | Some(Value::Null)) {
        fields.insert("version".into(), Value::from(1));
    }
    Ok(fields)
}

/// Deserializes a prepared object into a record type.
pub(crate) fn decode<T: DeserializeOwned>(fields: Map<String, Value>, what: &str) -> Result<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| StoreError::validation(format!("invalid {what}: {e}")))
}

/// Rejects blank tags and tags with surrounding whitespace, and drops
/// exact duplicates, keeping the first occurrence. Tags are otherwise
/// stored as given.
pub(crate) fn normalize_tags(tags: &[String], what: &str) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if tag.trim().is_empty() {
            return Err(StoreError::validation(format!("{what}.tags must not contain empty strings")));
        }
        if tag.trim() != tag {
            return Err(StoreError::validation(format!(
                "{what}.tags must not have surrounding whitespace: {tag:?}"
            )));
        }
        if !normalized.contains(tag) {
            normalized.push(tag.clone());
        }
    }
    Ok(normalized)
}

pub(crate) fn require_non_negative(value: i64, field: &str) -> Result<()> {
    if value < 0 {
        return Err(StoreError::validation(format!("{field} must be >= 0, got {value}")));
    }
    Ok(())
}

pub(crate) fn require_text(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn check_timestamps(created_at: i64, updated_at: i64, version: i64, what: &str) -> Result<()> {
    require_non_negative(created_at, &format!("{what}.created_at"))?;
    require_non_negative(updated_at, &format!("{what}.updated_at"))?;
    if version < 1 {
        return Err(StoreError::validation(format!("{what}.version must be >= 1")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stamped_fills_bookkeeping_fields() {
        let fields = stamped(&json!({"name": "x"}), "thing", 42).unwrap();
        assert_eq!(fields["created_at"], 42);
        assert_eq!(fields["updated_at"], 42);
        assert_eq!(fields["version"], 1);

        let kept = stamped(&json!({"created_at": 5, "version": 3}), "thing", 42).unwrap();
        assert_eq!(kept["created_at"], 5);
        assert_eq!(kept["updated_at"], 5);
        assert_eq!(kept["version"], 3);
    }

    #[test]
    fn normalize_tags_dedupes_exactly_and_keeps_order() {
        let tags = vec!["b".to_string(), "a".into(), "b".into(), "B".into()];
        assert_eq!(normalize_tags(&tags, "pdf").unwrap(), vec!["b", "a", "B"]);
        assert!(normalize_tags(&["  ".to_string()], "pdf").is_err());
    }

    #[test]
    fn normalize_tags_rejects_surrounding_whitespace() {
        for tag in [" a", "a ", "\tmath"] {
            assert!(
                matches!(
                    normalize_tags(&[tag.to_string()], "pdf"),
                    Err(StoreError::Validation(_))
                ),
                "{tag:?} should be rejected"
            );
        }
        assert_eq!(
            normalize_tags(&["machine learning".to_string()], "pdf").unwrap(),
            vec!["machine learning"]
        );
    }
}
