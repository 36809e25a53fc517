use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{IdKind, check_timestamps, decode, normalize_tags, require_non_negative, require_text, stamped};
use crate::error::{Result, StoreError};
use crate::query::{self, Condition, Formula, SortConfig, fields};

fn default_enabled() -> bool {
    true
}

/// A named, reusable PDF search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCondition {
    pub uuid: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
    #[serde(default)]
    pub description: String,
    pub condition: Condition,
    #[serde(default)]
    pub use_count: i64,
    #[serde(default)]
    pub last_used_at: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort_config: Option<SortConfig>,
}

impl SearchCondition {
    pub const COLUMNS: &'static [&'static str] =
        &["uuid", "name", "created_at", "updated_at", "version"];

    /// Builds a normalized saved search. The filter tree and any sort
    /// formula are compiled once here so broken searches are never stored.
    pub fn validate(raw: &Value, now: i64) -> Result<Self> {
        let mut fields = stamped(raw, "search_condition", now)?;
        let uuid =
            IdKind::SearchCondition.check_or_generate(fields.get("uuid").and_then(Value::as_str))?;
        fields.insert("uuid".into(), Value::from(uuid));

        let mut record: SearchCondition = decode(fields, "search_condition")?;
        record.name = record.name.trim().to_string();
        require_text(&record.name, "search_condition.name")?;
        require_non_negative(record.use_count, "use_count")?;
        record.tags = normalize_tags(&record.tags, "search_condition")?;

        query::check_condition(&record.condition)?;
        match &record.sort_config {
            Some(SortConfig::Weighted { formula, .. }) => {
                // Unlisted names are tolerated; searches return such rows unranked
                if let Err(e) = Formula::parse(formula)
                    && !e.is_not_allowed()
                {
                    return Err(StoreError::validation(format!("invalid sort formula: {e}")));
                }
            }
            Some(SortConfig::MultiField { fields: sort_fields }) => {
                if let Some(unknown) = sort_fields.iter().find(|f| fields::lookup(&f.field).is_none()) {
                    return Err(StoreError::validation(format!(
                        "unknown sort field: {}",
                        unknown.field
                    )));
                }
            }
            _ => {}
        }
        check_timestamps(record.created_at, record.updated_at, record.version, "search_condition")?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> Value {
        json!({
            "name": "  Unread math  ",
            "condition": {
                "type": "composite",
                "operator": "AND",
                "conditions": [
                    {"type": "field", "field": "tags", "operator": "has_all", "value": ["math"]},
                    {"type": "field", "field": "review_count", "operator": "eq", "value": 0}
                ]
            },
            "sort_config": {"mode": "weighted", "formula": "normalize(rating, 0, 5)"}
        })
    }

    #[test]
    fn valid_search_is_normalized() {
        let search = SearchCondition::validate(&raw(), 3).unwrap();

        assert_eq!(search.name, "Unread math");
        assert!(search.enabled);
        assert!(IdKind::SearchCondition.matches(&search.uuid));
    }

    #[test]
    fn unlisted_formula_names_are_stored() {
        let mut raw = raw();
        raw["sort_config"]["formula"] = json!("secret + tags_length()");

        assert!(SearchCondition::validate(&raw, 1).is_ok());
    }

    #[test]
    fn broken_filter_or_formula_is_rejected() {
        let mut bad_field = raw();
        bad_field["condition"]["conditions"][0]["field"] = json!("owner");
        let mut bad_formula = raw();
        bad_formula["sort_config"]["formula"] = json!("rating * (2");
        let mut no_name = raw();
        no_name["name"] = json!("   ");

        for raw in [bad_field, bad_formula, no_name] {
            assert!(
                matches!(SearchCondition::validate(&raw, 1), Err(StoreError::Validation(_))),
                "{raw} should be rejected"
            );
        }
    }
}
