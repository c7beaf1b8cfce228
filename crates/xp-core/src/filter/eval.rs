//! # Clause Evaluation
//!
//! A single dispatch over [`FilterOperator`]. Null handling is centralized
//! here:
//!
//! - both sides null: `Equals` holds, ordering comparisons do not;
//! - one side null: `Equals` fails, `NotEquals` holds, ordering fails;
//! - null field: `NotContains` / `NotStartsWith` / `NotEndsWith` hold,
//!   their positive counterparts and `In` fail.
//!
//! Values that cannot be coerced to the requested type never match.

use super::{FilterClause, FilterOperator, FilterType, FilterableRow};
use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::cmp::Ordering;

/// AND over all clauses. An empty slice matches everything.
pub fn clauses_match(row: &dyn FilterableRow, clauses: &[FilterClause]) -> bool {
    clauses.iter().all(|clause| clause_matches(row, clause))
}

pub fn clause_matches(row: &dyn FilterableRow, clause: &FilterClause) -> bool {
    let field = non_null(row.field(&clause.field));
    let target = non_null(clause.value.clone());

    match clause.operator {
        FilterOperator::IsNull => field.is_none(),
        FilterOperator::IsNotNull => field.is_some(),
        FilterOperator::Equals => equals(field.as_ref(), target.as_ref(), clause.type_hint),
        FilterOperator::NotEquals => match (&field, &target) {
            (None, None) => false,
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => {
                matches!(compare(a, b, resolve_type(clause.type_hint, b)), Some(o) if o != Ordering::Equal)
            }
        },
        FilterOperator::LessThan => ordered(&field, &target, clause.type_hint, |o| o == Ordering::Less),
        FilterOperator::LessThanOrEqual => {
            ordered(&field, &target, clause.type_hint, |o| o != Ordering::Greater)
        }
        FilterOperator::GreaterThan => {
            ordered(&field, &target, clause.type_hint, |o| o == Ordering::Greater)
        }
        FilterOperator::GreaterThanOrEqual => {
            ordered(&field, &target, clause.type_hint, |o| o != Ordering::Less)
        }
        FilterOperator::Contains => text_test(&field, &target, |a, b| a.contains(b)).unwrap_or(false),
        FilterOperator::NotContains => text_test(&field, &target, |a, b| !a.contains(b)).unwrap_or(true),
        FilterOperator::StartsWith => {
            text_test(&field, &target, |a, b| a.starts_with(b)).unwrap_or(false)
        }
        FilterOperator::NotStartsWith => {
            text_test(&field, &target, |a, b| !a.starts_with(b)).unwrap_or(true)
        }
        FilterOperator::EndsWith => text_test(&field, &target, |a, b| a.ends_with(b)).unwrap_or(false),
        FilterOperator::NotEndsWith => {
            text_test(&field, &target, |a, b| !a.ends_with(b)).unwrap_or(true)
        }
        FilterOperator::In => match &field {
            None => false,
            Some(a) => {
                let needle = value_to_string(a).to_lowercase();
                candidates(clause)
                    .iter()
                    .any(|c| value_to_string(c).to_lowercase() == needle)
            }
        },
    }
}

/// Case-insensitive substring search over every searchable value.
/// A blank term matches everything.
pub fn quick_filter_matches(row: &dyn FilterableRow, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    row.searchable_values()
        .iter()
        .filter(|v| !v.is_null())
        .any(|v| value_to_string(v).to_lowercase().contains(&term))
}

/// String form used for substring tests, membership and distinct values.
pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn non_null(v: Option<Value>) -> Option<Value> {
    v.filter(|v| !v.is_null())
}

fn candidates(clause: &FilterClause) -> Vec<Value> {
    match (&clause.values, &clause.value) {
        (Some(values), _) => values.clone(),
        (None, Some(Value::Array(values))) => values.clone(),
        (None, Some(v)) => vec![v.clone()],
        (None, None) => Vec::new(),
    }
}

fn equals(a: Option<&Value>, b: Option<&Value>, hint: Option<FilterType>) -> bool {
    match (a, b) {
        (None, None) => true,
        (None, _) | (_, None) => false,
        (Some(a), Some(b)) => compare(a, b, resolve_type(hint, b)) == Some(Ordering::Equal),
    }
}

fn ordered(
    a: &Option<Value>,
    b: &Option<Value>,
    hint: Option<FilterType>,
    accept: impl Fn(Ordering) -> bool,
) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => compare(a, b, resolve_type(hint, b)).is_some_and(accept),
        _ => false,
    }
}

/// `None` when the field is null; the comparison result otherwise.
fn text_test(
    a: &Option<Value>,
    b: &Option<Value>,
    test: impl Fn(&str, &str) -> bool,
) -> Option<bool> {
    let a = value_to_string(a.as_ref()?).to_lowercase();
    let b = b.as_ref().map(value_to_string).unwrap_or_default().to_lowercase();
    Some(test(&a, &b))
}

/// Explicit hint wins, otherwise a number literal means a numeric comparison.
fn resolve_type(hint: Option<FilterType>, literal: &Value) -> FilterType {
    match (hint, literal) {
        (Some(hint), _) => hint,
        (None, Value::Number(_)) => FilterType::Number,
        (None, _) => FilterType::String,
    }
}

/// `None` stands for "not comparable" and never matches.
fn compare(a: &Value, b: &Value, ty: FilterType) -> Option<Ordering> {
    match ty {
        FilterType::Number => value_to_f64(a)?.partial_cmp(&value_to_f64(b)?),
        FilterType::Date => Some(value_to_datetime(a)?.date().cmp(&value_to_datetime(b)?.date())),
        FilterType::DateTime => Some(value_to_datetime(a)?.cmp(&value_to_datetime(b)?)),
        FilterType::Boolean => Some(value_to_bool(a)?.cmp(&value_to_bool(b)?)),
        FilterType::String => Some(
            value_to_string(a)
                .to_lowercase()
                .cmp(&value_to_string(b).to_lowercase()),
        ),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| !n.is_nan()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn value_to_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn value_to_datetime(v: &Value) -> Option<NaiveDateTime> {
    let raw = match v {
        Value::String(s) => s.trim(),
        _ => return None,
    };
    if let Some(dt) = crate::event::parse_timestamp(raw) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
