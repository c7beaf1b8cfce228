//! # View Templates
//!
//! A view maps display columns onto one or more raw event fields. The first
//! mapped field holding a value wins, so a `TextData` column can show
//! `sql_text` for one event class and `batch_text` for another.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::event::EventRow;
use crate::filter::FilterableRow;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewColumn {
    pub name: String,
    pub event_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u16>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

impl ViewColumn {
    pub fn new(name: &str, fields: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            event_fields: fields.iter().map(|f| f.to_string()).collect(),
            width: None,
            visible: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    pub name: String,
    pub columns: Vec<ViewColumn>,
}

impl ViewConfig {
    /// Project a row onto this view's columns.
    pub fn to_view_row(&self, row: &EventRow) -> ViewRow {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), Value::String(row.id.clone()));
        values.insert("eventNumber".to_string(), Value::from(row.event_number));

        for column in &self.columns {
            let value = column
                .event_fields
                .iter()
                .filter_map(|f| row.field(f))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null);
            values.insert(column.name.clone(), value);
        }

        ViewRow { values }
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &ViewColumn> {
        self.columns.iter().filter(|c| c.visible)
    }

    /// The general-purpose view.
    pub fn standard() -> Self {
        Self {
            name: "Standard View".into(),
            columns: vec![
                ViewColumn::new("EventClass", &["eventClass"]),
                ViewColumn::new("TextData", &["textData"]),
                ViewColumn::new("ApplicationName", &["client_app_name"]),
                ViewColumn::new("NTUserName", &["nt_username"]),
                ViewColumn::new("LoginName", &["server_principal_name", "username"]),
                ViewColumn::new("ClientProcessID", &["client_pid"]),
                ViewColumn::new("SPID", &["spid"]),
                ViewColumn::new("StartTime", &["timestamp"]),
                ViewColumn::new("CPU", &["cpu"]),
                ViewColumn::new("Reads", &["reads"]),
                ViewColumn::new("Writes", &["writes"]),
                ViewColumn::new("Duration", &["duration"]),
                ViewColumn::new("DatabaseName", &["databaseName"]),
            ],
        }
    }

    /// Statement-oriented view without resource counters.
    pub fn tsql() -> Self {
        Self {
            name: "TSQL View".into(),
            columns: vec![
                ViewColumn::new("EventClass", &["eventClass"]),
                ViewColumn::new("TextData", &["textData"]),
                ViewColumn::new("SPID", &["spid"]),
                ViewColumn::new("StartTime", &["timestamp"]),
                ViewColumn::new("DatabaseName", &["databaseName"]),
            ],
        }
    }

    /// Resource-oriented view for finding expensive statements.
    pub fn tuning() -> Self {
        Self {
            name: "Tuning View".into(),
            columns: vec![
                ViewColumn::new("EventClass", &["eventClass"]),
                ViewColumn::new("TextData", &["textData"]),
                ViewColumn::new("Duration", &["duration"]),
                ViewColumn::new("CPU", &["cpu"]),
                ViewColumn::new("Reads", &["reads"]),
                ViewColumn::new("Writes", &["writes"]),
                ViewColumn::new("SPID", &["spid"]),
                ViewColumn::new("StartTime", &["timestamp"]),
                ViewColumn::new("DatabaseName", &["databaseName"]),
            ],
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::standard(), Self::tsql(), Self::tuning()]
    }
}

/// A row projected through a [`ViewConfig`], keyed by column name.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(transparent)]
pub struct ViewRow {
    values: BTreeMap<String, Value>,
}

impl ViewRow {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }
}

impl FilterableRow for ViewRow {
    fn field(&self, name: &str) -> Option<Value> {
        self.values.get(name).filter(|v| !v.is_null()).cloned()
    }

    fn searchable_values(&self) -> Vec<Value> {
        self.values
            .iter()
            .filter(|(k, _)| k.as_str() != "id" && k.as_str() != "eventNumber")
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_non_null_field_wins() {
        let view = ViewConfig {
            name: "v".into(),
            columns: vec![ViewColumn::new("Login", &["server_principal_name", "username"])],
        };
        let mut row = EventRow::new("a", 1, "login");
        row.additional_data.insert("username".into(), "sa".into());
        let projected = view.to_view_row(&row);
        assert_eq!(projected.get("Login"), Some(&Value::String("sa".into())));
        assert_eq!(projected.get("id"), Some(&Value::String("a".into())));
    }

    #[test]
    fn test_missing_fields_project_to_null() {
        let row = EventRow::new("a", 1, "login");
        let projected = ViewConfig::standard().to_view_row(&row);
        assert_eq!(projected.get("Duration"), Some(&Value::Null));
        assert_eq!(projected.field("Duration"), None);
        assert_eq!(
            projected.field("EventClass"),
            Some(Value::String("login".into()))
        );
    }

    #[test]
    fn test_quick_filter_values_skip_identity() {
        let row = EventRow::new("find-me", 7, "login");
        let projected = ViewConfig::tsql().to_view_row(&row);
        let values = projected.searchable_values();
        assert!(!values.contains(&Value::String("find-me".into())));
        assert!(values.contains(&Value::String("login".into())));
    }
}
