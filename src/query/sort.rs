//! In-memory ordering for sorts SQL cannot express: manual id lists,
//! multi-field sorts over tags, and formula-weighted ranking.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::query::fields;
use crate::query::filter::{SortConfig, SortDirection, SortField};
use crate::query::formula::Formula;

/// Reorders `records` according to `sort`.
///
/// `records` are expected in the default order (most recently updated
/// first); every mode here is a stable sort on top of it. `id_field` names
/// the key manual ordering refers to.
pub fn sort_records<T: Serialize>(records: Vec<T>, sort: &SortConfig, id_field: &str) -> Result<Vec<T>> {
    match sort {
        SortConfig::Unsorted => Ok(records),
        SortConfig::Manual { order } => {
            let mut keyed = with_fields(records)?;
            keyed.sort_by_key(|(_, fields)| {
                let id = fields.get(id_field).and_then(Value::as_str);
                id.and_then(|id| order.iter().position(|o| o == id))
                    .unwrap_or(usize::MAX)
            });
            Ok(keyed.into_iter().map(|(record, _)| record).collect())
        }
        SortConfig::MultiField { fields: sort_fields } => {
            for sort_field in sort_fields {
                if fields::lookup(&sort_field.field).is_none() {
                    return Err(StoreError::validation(format!(
                        "unknown sort field: {}",
                        sort_field.field
                    )));
                }
            }
            let mut keyed = with_fields(records)?;
            keyed.sort_by(|(_, a), (_, b)| compare_by_fields(a, b, sort_fields));
            Ok(keyed.into_iter().map(|(record, _)| record).collect())
        }
        SortConfig::Weighted { formula, direction } => match Formula::parse(formula) {
            Ok(formula) => rank_by_formula(records, &formula, *direction),
            // Nothing can be ranked; every record comes back unranked in fetch order
            Err(e) if e.is_not_allowed() => {
                warn!(formula = %formula, error = %e, "weighted sort skipped");
                Ok(records)
            }
            Err(e) => Err(StoreError::validation(format!("invalid sort formula: {e}"))),
        },
    }
}

/// Ranks records by formula score. Records whose evaluation fails keep
/// their relative order and follow every ranked record.
fn rank_by_formula<T: Serialize>(records: Vec<T>, formula: &Formula, direction: SortDirection) -> Result<Vec<T>> {
    let mut ranked = Vec::with_capacity(records.len());
    let mut unranked = Vec::new();

    for (record, fields) in with_fields(records)? {
        match formula.evaluate(&fields) {
            Ok(score) => ranked.push((score, record)),
            Err(e) => {
                debug!(formula = formula.source(), error = %e, "record excluded from weighted ranking");
                unranked.push(record);
            }
        }
    }

    ranked.sort_by(|(a, _), (b, _)| {
        let ord = a.partial_cmp(b).unwrap_or(Ordering::Equal);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });

    Ok(ranked
        .into_iter()
        .map(|(_, record)| record)
        .chain(unranked)
        .collect())
}

fn with_fields<T: Serialize>(records: Vec<T>) -> Result<Vec<(T, Map<String, Value>)>> {
    records
        .into_iter()
        .map(|record| -> Result<(T, Map<String, Value>)> {
            match serde_json::to_value(&record)? {
                Value::Object(fields) => Ok((record, fields)),
                _ => Err(StoreError::Query("sortable record is not an object".into())),
            }
        })
        .collect()
}

fn compare_by_fields(a: &Map<String, Value>, b: &Map<String, Value>, sort_fields: &[SortField]) -> Ordering {
    for sort_field in sort_fields {
        let ord = compare_values(a.get(&sort_field.field), b.get(&sort_field.field));
        let ord = match sort_field.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Null < bool < number < string < array; arrays compare by length.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}
