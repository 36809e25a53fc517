use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{IdKind, check_timestamps, decode, require_text, stamped};
use crate::error::{Result, StoreError};

static IMAGE_HASH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{32}$").expect("valid image hash pattern"));
static HEX_COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid color pattern"));

/// An annotation attached to one page of a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub ann_id: String,
    pub pdf_uuid: String,
    pub page_number: i64,
    /// Serialized as `type` plus `data`.
    #[serde(flatten)]
    pub body: AnnotationBody,
    #[serde(default)]
    pub comments: Vec<AnnotationComment>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
}

/// Type-specific annotation content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum AnnotationBody {
    Screenshot(Screenshot),
    TextHighlight(TextHighlight),
    Comment(CommentNote),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    pub rect: Rect,
    pub image_path: String,
    /// MD5 of the captured image, hex encoded.
    pub image_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextHighlight {
    pub selected_text: String,
    pub text_ranges: Vec<TextRange>,
    pub highlight_color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentNote {
    pub position: Point,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextRange {
    pub start: i64,
    pub end: i64,
}

/// A reply in an annotation's discussion thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationComment {
    pub id: String,
    pub content: String,
    pub created_at: i64,
}

impl AnnotationBody {
    /// The `type` discriminator as stored in the `type` column.
    pub fn type_name(&self) -> &'static str {
        match self {
            AnnotationBody::Screenshot(_) => "screenshot",
            AnnotationBody::TextHighlight(_) => "text-highlight",
            AnnotationBody::Comment(_) => "comment",
        }
    }

    fn check(&self) -> Result<()> {
        match self {
            AnnotationBody::Screenshot(shot) => {
                if shot.rect.width <= 0.0 || shot.rect.height <= 0.0 {
                    return Err(StoreError::validation(
                        "screenshot rect width and height must be positive",
                    ));
                }
                require_text(&shot.image_path, "screenshot.imagePath")?;
                if !IMAGE_HASH.is_match(&shot.image_hash) {
                    return Err(StoreError::validation(
                        "screenshot.imageHash must be 32 hex characters",
                    ));
                }
            }
            AnnotationBody::TextHighlight(highlight) => {
                require_text(&highlight.selected_text, "text-highlight.selectedText")?;
                if highlight.text_ranges.is_empty() {
                    return Err(StoreError::validation(
                        "text-highlight.textRanges must not be empty",
                    ));
                }
                if let Some(range) = highlight
                    .text_ranges
                    .iter()
                    .find(|r| r.start < 0 || r.end < r.start)
                {
                    return Err(StoreError::validation(format!(
                        "invalid text range {}..{}",
                        range.start, range.end
                    )));
                }
                if !HEX_COLOR.is_match(&highlight.highlight_color) {
                    return Err(StoreError::validation(
                        "text-highlight.highlightColor must look like #rrggbb",
                    ));
                }
            }
            AnnotationBody::Comment(comment) => {
                require_text(&comment.content, "comment.content")?;
            }
        }
        Ok(())
    }
}

impl Annotation {
    pub const COLUMNS: &'static [&'static str] = &[
        "ann_id",
        "pdf_uuid",
        "type",
        "page_number",
        "created_at",
        "updated_at",
        "version",
    ];

    /// Builds a normalized annotation; generates `ann_id` when absent.
    pub fn validate(raw: &Value, now: i64) -> Result<Self> {
        let mut fields = stamped(raw, "annotation", now)?;
        let ann_id = IdKind::Annotation
            .check_or_generate(fields.get("ann_id").and_then(Value::as_str))?;
        fields.insert("ann_id".into(), Value::from(ann_id));

        let record: Annotation = decode(fields, "annotation")?;
        IdKind::PdfUuid.check(&record.pdf_uuid)?;
        if record.page_number < 1 {
            return Err(StoreError::validation(format!(
                "page_number must be >= 1, got {}",
                record.page_number
            )));
        }
        record.body.check()?;
        for comment in &record.comments {
            require_text(&comment.id, "comment.id")?;
            require_text(&comment.content, "comment.content")?;
        }
        check_timestamps(record.created_at, record.updated_at, record.version, "annotation")?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn highlight() -> Value {
        json!({
            "pdf_uuid": "0c251de0e2ac",
            "page_number": 3,
            "type": "text-highlight",
            "data": {
                "selectedText": "ownership",
                "textRanges": [{"start": 10, "end": 19}],
                "highlightColor": "#ffcc00"
            }
        })
    }

    #[test]
    fn highlight_round_trips_through_tagged_body() {
        let record = Annotation::validate(&highlight(), 5).unwrap();

        assert!(IdKind::Annotation.matches(&record.ann_id));
        assert_eq!(record.body.type_name(), "text-highlight");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "text-highlight");
        assert_eq!(value["data"]["highlightColor"], "#ffcc00");
        let back: Annotation = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn screenshot_requires_positive_rect_and_hash() {
        let mut raw = json!({
            "pdf_uuid": "0c251de0e2ac",
            "page_number": 1,
            "type": "screenshot",
            "data": {
                "rect": {"x": 0, "y": 0, "width": 100, "height": 50},
                "imagePath": "shots/1.png",
                "imageHash": "d41d8cd98f00b204e9800998ecf8427e"
            }
        });
        assert!(Annotation::validate(&raw, 1).is_ok());

        raw["data"]["rect"]["width"] = json!(0);
        assert!(Annotation::validate(&raw, 1).is_err());

        raw["data"]["rect"]["width"] = json!(10);
        raw["data"]["imageHash"] = json!("abc");
        assert!(Annotation::validate(&raw, 1).is_err());
    }

    #[test]
    fn invalid_payloads_are_rejected() {
        let mut bad_range = highlight();
        bad_range["data"]["textRanges"] = json!([{"start": 5, "end": 2}]);
        let mut bad_color = highlight();
        bad_color["data"]["highlightColor"] = json!("yellow");
        let mut bad_page = highlight();
        bad_page["page_number"] = json!(0);
        let mut bad_type = highlight();
        bad_type["type"] = json!("sticker");
        let empty_comment = json!({
            "pdf_uuid": "0c251de0e2ac",
            "page_number": 1,
            "type": "comment",
            "data": {"position": {"x": 1, "y": 2}, "content": " "}
        });

        for raw in [bad_range, bad_color, bad_page, bad_type, empty_comment] {
            assert!(
                matches!(Annotation::validate(&raw, 1), Err(StoreError::Validation(_))),
                "{raw} should be rejected"
            );
        }
    }
}
