//! Compiles free-text tokens and filter trees into a parameterized
//! `WHERE` clause over `pdf_info`.
//!
//! Column expressions come only from the field catalog; every
//! user-supplied value is bound as a parameter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::SqlValue;
use crate::error::{Result, StoreError};
use crate::query::fields::{self, FieldKind, FieldSpec, TAGS_PATH};
use crate::query::filter::{
    Condition, FieldCondition, FieldOperator, FuzzyCondition, LogicalOperator, MatchMode,
    SortConfig,
};
use crate::utils::escape_like;

const MAX_FILTER_DEPTH: usize = 32;

/// Fallback order for searches that do not ask for one.
pub const DEFAULT_ORDER_BY: &str = "pdf_info.updated_at DESC, pdf_info.uuid ASC";

/// A PDF search: tokens, an optional filter tree, sorting and paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Free-text tokens; every token must match at least one search field.
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub filter: Option<Condition>,
    /// Restricts which fields tokens are matched against.
    #[serde(default)]
    pub search_fields: Option<Vec<String>>,
    #[serde(default)]
    pub sort: SortConfig,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl SearchRequest {
    /// A request matching `tokens` with default sorting and no paging.
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Condition) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortConfig) -> Self {
        self.sort = sort;
        self
    }
}

/// A `WHERE` clause body and the values bound to its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub where_sql: String,
    pub params: Vec<SqlValue>,
}

/// Compiles the token groups and filter of `request`.
pub fn compile(request: &SearchRequest) -> Result<CompiledQuery> {
    let mut compiler = Compiler::default();
    let mut clauses = Vec::new();

    let search_fields = match &request.search_fields {
        Some(names) if !names.is_empty() => resolve_search_fields(names)?,
        _ => fields::default_search_fields(),
    };

    for token in request.tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        clauses.push(compiler.token_group(token, &search_fields));
    }

    if let Some(filter) = &request.filter {
        clauses.push(compiler.condition(filter, 0)?);
    }

    let where_sql = if clauses.is_empty() {
        "1".to_string()
    } else {
        clauses.join(" AND ")
    };
    Ok(CompiledQuery {
        where_sql,
        params: compiler.params,
    })
}

/// Compiles a filter tree on its own.
pub fn compile_condition(condition: &Condition) -> Result<CompiledQuery> {
    let mut compiler = Compiler::default();
    let where_sql = compiler.condition(condition, 0)?;
    Ok(CompiledQuery {
        where_sql,
        params: compiler.params,
    })
}

/// Validates a filter tree without running it.
pub fn check_condition(condition: &Condition) -> Result<()> {
    compile_condition(condition).map(|_| ())
}

/// The SQL `ORDER BY` body for `sort`, or `None` when the ordering has to
/// be applied in memory.
pub fn order_by_sql(sort: &SortConfig) -> Result<Option<String>> {
    match sort {
        SortConfig::Unsorted => Ok(Some(DEFAULT_ORDER_BY.to_string())),
        SortConfig::MultiField { fields: sort_fields } => {
            let mut parts = Vec::with_capacity(sort_fields.len() + 1);
            for sort_field in sort_fields {
                let spec = lookup_field(&sort_field.field)?;
                if !spec.orderable {
                    return Ok(None);
                }
                parts.push(format!("{} {}", spec.sql, sort_field.direction.sql()));
            }
            if parts.is_empty() {
                return Ok(Some(DEFAULT_ORDER_BY.to_string()));
            }
            parts.push("pdf_info.uuid ASC".to_string());
            Ok(Some(parts.join(", ")))
        }
        SortConfig::Manual { .. } | SortConfig::Weighted { .. } => Ok(None),
    }
}

fn lookup_field(name: &str) -> Result<&'static FieldSpec> {
    fields::lookup(name).ok_or_else(|| StoreError::validation(format!("unknown field: {name}")))
}

fn resolve_search_fields(names: &[String]) -> Result<Vec<&'static FieldSpec>> {
    names
        .iter()
        .map(|name| {
            let spec = lookup_field(name)?;
            if spec.searchable {
                Ok(spec)
            } else {
                Err(StoreError::validation(format!("field is not searchable: {name}")))
            }
        })
        .collect()
}

#[derive(Default)]
struct Compiler {
    params: Vec<SqlValue>,
}

impl Compiler {
    fn bind(&mut self, value: SqlValue) -> &'static str {
        self.params.push(value);
        "?"
    }

    /// One token OR-ed across `search_fields`.
    fn token_group(&mut self, token: &str, search_fields: &[&'static FieldSpec]) -> String {
        let mut alternatives = Vec::with_capacity(search_fields.len());
        for spec in search_fields {
            let clause = match spec.kind {
                FieldKind::Tags => self.tags_any(&[token.to_string()]),
                _ => self.like(spec, &format!("%{}%", escape_like(token)), false),
            };
            alternatives.push(clause);
        }
        if alternatives.is_empty() {
            return "0".to_string();
        }
        format!("({})", alternatives.join(" OR "))
    }

    fn condition(&mut self, condition: &Condition, depth: usize) -> Result<String> {
        if depth > MAX_FILTER_DEPTH {
            return Err(StoreError::validation("filter is nested too deeply"));
        }
        match condition {
            Condition::Fuzzy(fuzzy) => self.fuzzy(fuzzy),
            Condition::Field(field) => self.field(field),
            Condition::Composite(group) => {
                let children = &group.conditions;
                match group.operator {
                    LogicalOperator::Not => {
                        let first = children.first().ok_or_else(|| {
                            StoreError::validation("NOT requires at least one condition")
                        })?;
                        Ok(format!("NOT ({})", self.condition(first, depth + 1)?))
                    }
                    LogicalOperator::And | LogicalOperator::Or => {
                        let (joiner, empty) = if group.operator == LogicalOperator::And {
                            (" AND ", "1")
                        } else {
                            (" OR ", "0")
                        };
                        if children.is_empty() {
                            return Ok(empty.to_string());
                        }
                        let mut parts = Vec::with_capacity(children.len());
                        for child in children {
                            parts.push(self.condition(child, depth + 1)?);
                        }
                        Ok(format!("({})", parts.join(joiner)))
                    }
                }
            }
        }
    }

    fn fuzzy(&mut self, fuzzy: &FuzzyCondition) -> Result<String> {
        let keywords: Vec<&str> = fuzzy
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(StoreError::validation("fuzzy condition needs at least one keyword"));
        }

        let search_fields = if fuzzy.search_fields.is_empty() {
            fields::default_search_fields()
        } else {
            resolve_search_fields(&fuzzy.search_fields)?
        };

        let groups: Vec<String> = keywords
            .iter()
            .map(|k| self.token_group(k, &search_fields))
            .collect();
        let joiner = match fuzzy.match_mode {
            MatchMode::All => " AND ",
            MatchMode::Any => " OR ",
        };
        Ok(format!("({})", groups.join(joiner)))
    }

    fn field(&mut self, condition: &FieldCondition) -> Result<String> {
        let spec = lookup_field(&condition.field)?;
        let op = condition.operator;
        let unsupported = || {
            StoreError::validation(format!(
                "operator {op:?} is not supported for field {}",
                spec.name
            ))
        };

        match spec.kind {
            FieldKind::Number => {
                if condition.value.is_null() {
                    return match op {
                        FieldOperator::Eq => Ok(format!("{} IS NULL", spec.sql)),
                        FieldOperator::Ne => Ok(format!("{} IS NOT NULL", spec.sql)),
                        _ => Err(StoreError::validation(format!(
                            "{} requires a numeric value",
                            spec.name
                        ))),
                    };
                }
                let sql_op = match op {
                    FieldOperator::Eq => "=",
                    FieldOperator::Ne => "!=",
                    FieldOperator::Gt => ">",
                    FieldOperator::Gte => ">=",
                    FieldOperator::Lt => "<",
                    FieldOperator::Lte => "<=",
                    _ => return Err(unsupported()),
                };
                let value = number_param(spec, &condition.value)?;
                Ok(format!("{} {sql_op} {}", spec.sql, self.bind(value)))
            }
            FieldKind::Boolean => {
                let flag = match &condition.value {
                    Value::Bool(b) => *b,
                    Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                        n.as_i64() == Some(1)
                    }
                    other => {
                        return Err(StoreError::validation(format!(
                            "{} requires a boolean value, got {other}",
                            spec.name
                        )));
                    }
                };
                let sql_op = match op {
                    FieldOperator::Eq => "=",
                    FieldOperator::Ne => "!=",
                    _ => return Err(unsupported()),
                };
                let value = SqlValue::Integer(i64::from(flag));
                Ok(format!("{} {sql_op} {}", spec.sql, self.bind(value)))
            }
            FieldKind::Text => {
                let text = condition.value.as_str().ok_or_else(|| {
                    StoreError::validation(format!("{} requires a string value", spec.name))
                })?;
                match op {
                    FieldOperator::Eq => {
                        let p = self.bind(SqlValue::Text(text.to_string()));
                        Ok(format!("{} = {p}", spec.sql))
                    }
                    FieldOperator::Ne => {
                        let p = self.bind(SqlValue::Text(text.to_string()));
                        Ok(format!("COALESCE({}, '') != {p}", spec.sql))
                    }
                    FieldOperator::Contains => {
                        Ok(self.like(spec, &format!("%{}%", escape_like(text)), false))
                    }
                    FieldOperator::NotContains => {
                        Ok(self.like(spec, &format!("%{}%", escape_like(text)), true))
                    }
                    FieldOperator::StartsWith => {
                        Ok(self.like(spec, &format!("{}%", escape_like(text)), false))
                    }
                    FieldOperator::EndsWith => {
                        Ok(self.like(spec, &format!("%{}", escape_like(text)), false))
                    }
                    _ => Err(unsupported()),
                }
            }
            FieldKind::Tags => {
                let tags = tag_values(&condition.value)?;
                match op {
                    FieldOperator::Contains | FieldOperator::HasAny => Ok(self.tags_any(&tags)),
                    FieldOperator::NotContains => Ok(format!("NOT {}", self.tags_any(&tags))),
                    FieldOperator::HasAll => Ok(self.tags_all(&tags)),
                    FieldOperator::NotHasAll => Ok(format!("NOT {}", self.tags_all(&tags))),
                    FieldOperator::Eq => Ok(self.tags_equal(&tags)),
                    FieldOperator::Ne => Ok(format!("NOT {}", self.tags_equal(&tags))),
                    _ => Err(unsupported()),
                }
            }
        }
    }

    fn like(&mut self, spec: &FieldSpec, pattern: &str, negate: bool) -> String {
        let p = self.bind(SqlValue::Text(pattern.to_string()));
        let not = if negate { "NOT " } else { "" };
        format!("COALESCE({}, '') {not}LIKE {p} ESCAPE '\\'", spec.sql)
    }

    /// At least one element of the tag array is in `tags`.
    fn tags_any(&mut self, tags: &[String]) -> String {
        if tags.is_empty() {
            return "(0)".to_string();
        }
        let placeholders: Vec<&str> = tags
            .iter()
            .map(|t| self.bind(SqlValue::Text(t.clone())))
            .collect();
        format!(
            "(EXISTS (SELECT 1 FROM json_each(pdf_info.json_data, '{TAGS_PATH}') AS tag WHERE tag.value IN ({})))",
            placeholders.join(", ")
        )
    }

    /// Every element of `tags` is in the tag array.
    fn tags_all(&mut self, tags: &[String]) -> String {
        if tags.is_empty() {
            return "(1)".to_string();
        }
        let clauses: Vec<String> = tags
            .iter()
            .map(|t| {
                let p = self.bind(SqlValue::Text(t.clone()));
                format!(
                    "EXISTS (SELECT 1 FROM json_each(pdf_info.json_data, '{TAGS_PATH}') AS tag WHERE tag.value = {p})"
                )
            })
            .collect();
        format!("({})", clauses.join(" AND "))
    }

    /// The tag array holds exactly the elements of `tags`, in any order.
    /// Stored tags are deduplicated, so a length match plus containment is
    /// set equality.
    fn tags_equal(&mut self, tags: &[String]) -> String {
        let len = self.bind(SqlValue::Integer(tags.len() as i64));
        let length_clause =
            format!("COALESCE(json_array_length(pdf_info.json_data, '{TAGS_PATH}'), 0) = {len}");
        format!("({length_clause} AND {})", self.tags_all(tags))
    }
}

fn number_param(spec: &FieldSpec, value: &Value) -> Result<SqlValue> {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => n
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| StoreError::validation(format!("{} value out of range", spec.name))),
        },
        other => Err(StoreError::validation(format!(
            "{} requires a numeric value, got {other}",
            spec.name
        ))),
    }
}

/// Accepts a single tag or an array of tags; trims and drops duplicates.
fn tag_values(value: &Value) -> Result<Vec<String>> {
    let raw: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::String(_) => vec![value],
        Value::Null => Vec::new(),
        other => {
            return Err(StoreError::validation(format!(
                "tags require a string or an array of strings, got {other}"
            )));
        }
    };

    let mut tags: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        let tag = item
            .as_str()
            .ok_or_else(|| StoreError::validation(format!("tag must be a string, got {item}")))?
            .trim();
        if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
            tags.push(tag.to_string());
        }
    }
    Ok(tags)
}
