//! # Column Filters
//!
//! Structured predicates over event rows. A [`FilterClause`] names a field,
//! an operator and a comparison value; clauses combine with AND semantics.
//! The free-text quick filter is evaluated separately (see
//! [`eval::quick_filter_matches`]).

pub mod eval;
pub mod parser;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use eval::{clause_matches, clauses_match, quick_filter_matches};
pub use parser::parse_clauses;

/// Anything the filter engine can inspect.
///
/// `field` resolves a single named value (`None` means null/absent);
/// `searchable_values` yields every value the quick filter scans, which
/// excludes the row identity and sequence number.
pub trait FilterableRow {
    fn field(&self, name: &str) -> Option<Value>;
    fn searchable_values(&self) -> Vec<Value>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    IsNull,
    IsNotNull,
    In,
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT CONTAINS",
            Self::StartsWith => "STARTSWITH",
            Self::NotStartsWith => "NOT STARTSWITH",
            Self::EndsWith => "ENDSWITH",
            Self::NotEndsWith => "NOT ENDSWITH",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::In => "IN",
        };
        f.write_str(s)
    }
}

/// Coercion hint for equality and ordering comparisons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterType {
    String,
    Number,
    Date,
    DateTime,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterClause {
    pub field: String,
    pub operator: FilterOperator,
    /// Absent for `IsNull` / `IsNotNull`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Candidate list for `In`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<FilterType>,
}

impl FilterClause {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: Some(value.into()),
            values: None,
            type_hint: None,
        }
    }

    pub fn null_check(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            operator,
            value: None,
            values: None,
            type_hint: None,
        }
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::In,
            value: None,
            values: Some(values),
            type_hint: None,
        }
    }

    pub fn with_type(mut self, hint: FilterType) -> Self {
        self.type_hint = Some(hint);
        self
    }
}
