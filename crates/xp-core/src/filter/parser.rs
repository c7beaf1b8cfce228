//! # Clause Expression Parser
//!
//! Parses a compact textual filter into [`FilterClause`]s.
//!
//! Syntax:
//! ```text
//! duration > 1000 AND databaseName IN (Sales, HR) AND textData NOT CONTAINS "sp_reset"
//! ```

use super::{FilterClause, FilterOperator};
use serde_json::Value;

/// Keyword operators, matched case-insensitively.
const KEYWORD_OPS: &[(&str, FilterOperator)] = &[
    (" IS NOT NULL", FilterOperator::IsNotNull),
    (" IS NULL", FilterOperator::IsNull),
    (" NOT STARTSWITH ", FilterOperator::NotStartsWith),
    (" NOT CONTAINS ", FilterOperator::NotContains),
    (" NOT ENDSWITH ", FilterOperator::NotEndsWith),
    (" STARTSWITH ", FilterOperator::StartsWith),
    (" CONTAINS ", FilterOperator::Contains),
    (" ENDSWITH ", FilterOperator::EndsWith),
    (" IN ", FilterOperator::In),
];

/// Symbolic operators.
const SYMBOL_OPS: &[(&str, FilterOperator)] = &[
    (">=", FilterOperator::GreaterThanOrEqual),
    ("<=", FilterOperator::LessThanOrEqual),
    ("!=", FilterOperator::NotEquals),
    ("<>", FilterOperator::NotEquals),
    (">", FilterOperator::GreaterThan),
    ("<", FilterOperator::LessThan),
    ("=", FilterOperator::Equals),
];

/// Parse `field OP value [AND ...]` into clauses. Blank input yields none.
///
/// Quoted values are always strings, and separators or operators inside
/// quotes are part of the value.
pub fn parse_clauses(input: &str) -> Result<Vec<FilterClause>, String> {
    split_unquoted(input.trim(), " AND ")
        .into_iter()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_clause)
        .collect()
}

fn parse_clause(part: &str) -> Result<FilterClause, String> {
    let upper = mask_quoted(part);

    // Earliest operator wins; at equal positions the longer spelling wins.
    let hit = KEYWORD_OPS
        .iter()
        .chain(SYMBOL_OPS)
        .filter_map(|(token, op)| upper.find(token).map(|idx| (idx, *token, *op)))
        .min_by_key(|(idx, token, _)| (*idx, std::cmp::Reverse(token.len())));

    let Some((idx, token, op)) = hit else {
        return Err(format!("Cannot parse condition: '{}'", part));
    };

    let field = part[..idx].trim();
    if field.is_empty() {
        return Err(format!("Missing field in condition: '{}'", part));
    }
    let rest = part[idx + token.len()..].trim();

    match op {
        FilterOperator::IsNull | FilterOperator::IsNotNull => {
            if !rest.is_empty() {
                return Err(format!("Unexpected value after {}: '{}'", op, rest));
            }
            Ok(FilterClause::null_check(field, op))
        }
        FilterOperator::In => {
            let list = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| format!("IN expects a parenthesized list: '{}'", part))?;
            let values = split_unquoted(list, ",")
                .into_iter()
                .map(|v| literal(v.trim()))
                .collect();
            Ok(FilterClause::one_of(field, values))
        }
        _ if rest.is_empty() => Err(format!("Missing value after {}: '{}'", op, part)),
        _ => Ok(FilterClause::new(field, op, literal(rest))),
    }
}

/// Uppercase copy of `s` with quoted text blanked out. Byte offsets match `s`.
fn mask_quoted(s: &str) -> String {
    let mut quote = None;
    let mut masked = String::with_capacity(s.len());
    for c in s.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                masked.push(c);
            }
            Some(_) => masked.extend(std::iter::repeat('_').take(c.len_utf8())),
            None => {
                if c == '"' || c == '\'' {
                    quote = Some(c);
                }
                masked.push(c.to_ascii_uppercase());
            }
        }
    }
    masked
}

fn split_unquoted<'a>(s: &'a str, pattern: &str) -> Vec<&'a str> {
    let masked = mask_quoted(s);
    let mut parts = Vec::new();
    let mut last = 0;

    while let Some(pos) = masked[last..].find(pattern) {
        let absolute_pos = last + pos;
        parts.push(&s[last..absolute_pos]);
        last = absolute_pos + pattern.len();
    }
    parts.push(&s[last..]);
    parts
}

/// A quoted token is a string as written; a bare one is typed.
fn literal(token: &str) -> Value {
    for q in ['"', '\''] {
        if let Some(inner) = token
            .strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
        {
            return Value::String(inner.to_string());
        }
    }
    parse_value(token)
}

fn parse_value(s: &str) -> Value {
    if let Ok(n) = s.parse::<i64>() {
        Value::Number(n.into())
    } else if let Ok(n) = s.parse::<f64>() {
        serde_json::json!(n)
    } else if s == "true" {
        Value::Bool(true)
    } else if s == "false" {
        Value::Bool(false)
    } else {
        Value::String(s.to_string())
    }
}
