//! # Event Rows
//!
//! A [`ProfilerEvent`] is what the tools service delivers in an
//! events-available notification: a name, a timestamp and an open bag of
//! string values. An [`EventRow`] is the same event after promotion of the
//! well-known XEvent fields into typed columns.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::filter::FilterableRow;

/// Default key carrying the server-side sequence number of an event.
pub const DEFAULT_SEQUENCE_FIELD: &str = "event_sequence";

/// Wire keys for the statement text, in order of preference.
const TEXT_KEYS: &[&str] = &["sql_text", "statement", "batch_text"];
const DATABASE_KEYS: &[&str] = &["database_name"];
const SPID_KEYS: &[&str] = &["session_id", "spid"];
const DURATION_KEYS: &[&str] = &["duration"];
const CPU_KEYS: &[&str] = &["cpu_time", "cpu"];
const READS_KEYS: &[&str] = &["logical_reads", "reads"];
const WRITES_KEYS: &[&str] = &["writes"];

/// One event as delivered by the tools service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilerEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_number: Option<u64>,
    /// XEvent name, e.g. `sql_batch_completed`.
    pub name: String,
    /// Wall-clock timestamp (ISO 8601).
    pub timestamp: String,
    #[serde(default)]
    pub values: HashMap<String, String>,
}

/// One captured trace event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRow {
    /// Unique within the lifetime of a session.
    pub id: String,
    /// Stable ordering key.
    pub event_number: u64,
    pub timestamp: DateTime<Utc>,
    pub event_class: String,
    pub text_data: Option<String>,
    pub database_name: Option<String>,
    pub spid: Option<i64>,
    /// Microseconds.
    pub duration: Option<i64>,
    /// Milliseconds.
    pub cpu: Option<i64>,
    pub reads: Option<i64>,
    pub writes: Option<i64>,
    /// Every wire value that was not promoted to a typed column.
    #[serde(default)]
    pub additional_data: HashMap<String, String>,
}

impl EventRow {
    /// Convert a wire event into a row.
    ///
    /// The sequence number is taken from `event.event_number`, then from the
    /// `sequence_field` value, and only then from `next_sequence`, which is
    /// not called when one of the first two is usable.
    pub fn from_event(
        event: ProfilerEvent,
        sequence_field: &str,
        next_sequence: impl FnOnce() -> u64,
    ) -> Self {
        let ProfilerEvent {
            id,
            event_number,
            name,
            timestamp,
            mut values,
        } = event;

        let event_number = event_number
            .or_else(|| {
                values
                    .get(sequence_field)
                    .and_then(|raw| raw.trim().parse::<u64>().ok())
            })
            .unwrap_or_else(next_sequence);

        let text_data = take_text(&mut values, TEXT_KEYS);
        let database_name = take_text(&mut values, DATABASE_KEYS);
        let spid = take_number(&mut values, SPID_KEYS);
        let duration = take_number(&mut values, DURATION_KEYS);
        let cpu = take_number(&mut values, CPU_KEYS);
        let reads = take_number(&mut values, READS_KEYS);
        let writes = take_number(&mut values, WRITES_KEYS);

        Self {
            id: id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            event_number,
            timestamp: parse_timestamp(&timestamp).unwrap_or_else(Utc::now),
            event_class: name,
            text_data,
            database_name,
            spid,
            duration,
            cpu,
            reads,
            writes,
            additional_data: values,
        }
    }

    /// Minimal row, mostly useful for tests and synthetic events.
    pub fn new(id: impl Into<String>, event_number: u64, event_class: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_number,
            timestamp: Utc::now(),
            event_class: event_class.into(),
            text_data: None,
            database_name: None,
            spid: None,
            duration: None,
            cpu: None,
            reads: None,
            writes: None,
            additional_data: HashMap::new(),
        }
    }

    fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl FilterableRow for EventRow {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "eventNumber" | "event_number" => Some(Value::from(self.event_number)),
            "timestamp" => Some(Value::String(self.timestamp_string())),
            "eventClass" | "event_class" | "name" => Some(Value::String(self.event_class.clone())),
            "textData" | "text_data" => self.text_data.clone().map(Value::String),
            "databaseName" | "database_name" => self.database_name.clone().map(Value::String),
            "spid" | "session_id" => self.spid.map(Value::from),
            "duration" => self.duration.map(Value::from),
            "cpu" | "cpu_time" => self.cpu.map(Value::from),
            "reads" | "logical_reads" => self.reads.map(Value::from),
            "writes" => self.writes.map(Value::from),
            _ => self
                .additional_data
                .get(name)
                .map(|v| Value::String(v.clone())),
        }
    }

    fn searchable_values(&self) -> Vec<Value> {
        let mut out = vec![
            Value::String(self.event_class.clone()),
            Value::String(self.timestamp_string()),
        ];
        out.extend(self.text_data.clone().map(Value::String));
        out.extend(self.database_name.clone().map(Value::String));
        out.extend(
            [self.spid, self.duration, self.cpu, self.reads, self.writes]
                .into_iter()
                .flatten()
                .map(Value::from),
        );
        out.extend(self.additional_data.values().cloned().map(Value::String));
        out
    }
}

/// Parse an ISO 8601 / RFC 3339 timestamp, tolerating a missing offset.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Parse a numeric wire value. Blank or unparseable input yields `None`.
pub fn parse_number(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(|n| n.trunc() as i64)
    })
}

fn take_text(values: &mut HashMap<String, String>, keys: &[&str]) -> Option<String> {
    let key = keys.iter().find(|k| values.contains_key(**k))?;
    values.remove(*key)
}

fn take_number(values: &mut HashMap<String, String>, keys: &[&str]) -> Option<i64> {
    let key = keys.iter().find(|k| values.contains_key(**k))?;
    let raw = values.remove(*key)?;
    parse_number(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(values: &[(&str, &str)]) -> ProfilerEvent {
        ProfilerEvent {
            id: None,
            event_number: None,
            name: "sql_batch_completed".into(),
            timestamp: "2024-03-01T10:15:30.250Z".into(),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_generates_id_when_absent() {
        let row = EventRow::from_event(wire(&[]), DEFAULT_SEQUENCE_FIELD, || 1);
        assert_eq!(row.id.len(), 36);
        assert_eq!(row.event_class, "sql_batch_completed");
    }

    #[test]
    fn test_sequence_preference() {
        let mut explicit = wire(&[("event_sequence", "7")]);
        explicit.event_number = Some(3);
        let row = EventRow::from_event(explicit, DEFAULT_SEQUENCE_FIELD, || 99);
        assert_eq!(row.event_number, 3);

        let row = EventRow::from_event(
            wire(&[("event_sequence", "7")]),
            DEFAULT_SEQUENCE_FIELD,
            || 99,
        );
        assert_eq!(row.event_number, 7);

        let row = EventRow::from_event(
            wire(&[("event_sequence", "abc")]),
            DEFAULT_SEQUENCE_FIELD,
            || 99,
        );
        assert_eq!(row.event_number, 99);
    }

    #[test]
    fn test_text_prefers_sql_text() {
        let row = EventRow::from_event(
            wire(&[("statement", "stmt"), ("sql_text", "SELECT 1")]),
            DEFAULT_SEQUENCE_FIELD,
            || 1,
        );
        assert_eq!(row.text_data.as_deref(), Some("SELECT 1"));
        assert_eq!(
            row.additional_data.get("statement").map(String::as_str),
            Some("stmt")
        );

        let row = EventRow::from_event(wire(&[("statement", "stmt")]), DEFAULT_SEQUENCE_FIELD, || 1);
        assert_eq!(row.text_data.as_deref(), Some("stmt"));
    }

    #[test]
    fn test_numeric_fields_never_surface_nan() {
        let row = EventRow::from_event(
            wire(&[
                ("session_id", "53"),
                ("duration", ""),
                ("cpu_time", "NaN"),
                ("logical_reads", "12.9"),
                ("writes", "x"),
                ("client_app_name", "sqlcmd"),
            ]),
            DEFAULT_SEQUENCE_FIELD,
            || 1,
        );
        assert_eq!(row.spid, Some(53));
        assert_eq!(row.duration, None);
        assert_eq!(row.cpu, None);
        assert_eq!(row.reads, Some(12));
        assert_eq!(row.writes, None);
        assert_eq!(row.additional_data.len(), 1);
    }

    #[test]
    fn test_unparseable_timestamp_falls_back_to_now() {
        let mut event = wire(&[]);
        event.timestamp = "yesterday".into();
        let before = Utc::now();
        let row = EventRow::from_event(event, DEFAULT_SEQUENCE_FIELD, || 1);
        assert!(row.timestamp >= before);
    }

    #[test]
    fn test_field_lookup_falls_back_to_additional_data() {
        let row = EventRow::from_event(
            wire(&[("database_name", "Sales"), ("client_app_name", "sqlcmd")]),
            DEFAULT_SEQUENCE_FIELD,
            || 1,
        );
        assert_eq!(row.field("databaseName"), Some(Value::String("Sales".into())));
        assert_eq!(
            row.field("client_app_name"),
            Some(Value::String("sqlcmd".into()))
        );
        assert_eq!(row.field("missing"), None);
        assert_eq!(
            row.field("timestamp"),
            Some(Value::String("2024-03-01T10:15:30.250Z".into()))
        );
    }
}
