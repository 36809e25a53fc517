//! Filter trees and sort configuration, as stored in saved searches and
//! accepted by PDF search.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    /// Free-text keywords across several fields
    Fuzzy(FuzzyCondition),
    /// One field compared against a value
    Field(FieldCondition),
    /// Boolean combination of child conditions
    Composite(CompositeCondition),
}

impl Condition {
    /// Convenience constructor for a field predicate.
    pub fn field(field: &str, operator: FieldOperator, value: Value) -> Self {
        Condition::Field(FieldCondition {
            field: field.to_string(),
            operator,
            value,
        })
    }

    /// Convenience constructor for AND/OR/NOT groups.
    pub fn composite(operator: LogicalOperator, conditions: Vec<Condition>) -> Self {
        Condition::Composite(CompositeCondition {
            operator,
            conditions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyCondition {
    pub keywords: Vec<String>,
    /// Empty means every searchable field
    #[serde(default)]
    pub search_fields: Vec<String>,
    #[serde(default)]
    pub match_mode: MatchMode,
}

/// How fuzzy keywords combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every keyword must match somewhere
    #[default]
    All,
    /// At least one keyword must match
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub field: String,
    pub operator: FieldOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    HasAny,
    HasAll,
    NotHasAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeCondition {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
    /// Negates the first child only
    Not,
}

/// Direction of a sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// How search results are ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SortConfig {
    /// Most recently updated first
    #[default]
    #[serde(rename = "none")]
    Unsorted,
    /// Records listed in `order` first, in that order
    Manual { order: Vec<String> },
    /// Lexicographic over several fields
    MultiField { fields: Vec<SortField> },
    /// Numeric rank computed by a formula per record
    Weighted {
        formula: String,
        #[serde(default)]
        direction: SortDirection,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_tree_deserializes_from_tagged_json() {
        let raw = json!({
            "type": "composite",
            "operator": "AND",
            "conditions": [
                {"type": "field", "field": "rating", "operator": "gte", "value": 4},
                {"type": "fuzzy", "keywords": ["rust"], "searchFields": ["title"], "matchMode": "any"}
            ]
        });

        let condition: Condition = serde_json::from_value(raw).unwrap();

        let Condition::Composite(group) = condition else {
            panic!("expected composite");
        };
        assert_eq!(group.operator, LogicalOperator::And);
        assert_eq!(
            group.conditions[0],
            Condition::field("rating", FieldOperator::Gte, json!(4))
        );
        match &group.conditions[1] {
            Condition::Fuzzy(fuzzy) => {
                assert_eq!(fuzzy.search_fields, vec!["title"]);
                assert_eq!(fuzzy.match_mode, MatchMode::Any);
            }
            other => panic!("expected fuzzy, got {other:?}"),
        }
    }

    #[test]
    fn sort_config_modes_deserialize() {
        let none: SortConfig = serde_json::from_value(json!({"mode": "none"})).unwrap();
        assert_eq!(none, SortConfig::Unsorted);

        let weighted: SortConfig =
            serde_json::from_value(json!({"mode": "weighted", "formula": "tags_length()"})).unwrap();
        assert_eq!(
            weighted,
            SortConfig::Weighted {
                formula: "tags_length()".into(),
                direction: SortDirection::Desc
            }
        );

        let multi: SortConfig = serde_json::from_value(json!({
            "mode": "multi_field",
            "fields": [{"field": "rating"}, {"field": "title", "direction": "asc"}]
        }))
        .unwrap();
        assert!(matches!(multi, SortConfig::MultiField { ref fields } if fields.len() == 2));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let raw = json!({"type": "field", "field": "rating", "operator": "like", "value": 1});
        assert!(serde_json::from_value::<Condition>(raw).is_err());
    }
}
