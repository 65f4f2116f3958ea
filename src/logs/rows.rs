use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::Record;

/// One request row in the invocation list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRow {
    pub timestamp: String,
    pub name: String,
    pub success: bool,
    pub result_code: String,
    pub duration_ms: f64,
    pub operation_id: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_count: Option<u64>,
}

impl InvocationRow {
    pub fn from_record(record: &Record) -> Self {
        let result_code = string_field(record, "resultCode");
        let success = derive_success(bool_field(record, "success"), &result_code);
        Self {
            timestamp: string_field(record, "timestamp"),
            name: string_field(record, "name"),
            success,
            result_code,
            duration_ms: number_field(record, "duration").unwrap_or(0.0),
            operation_id: string_field(record, "operation_Id"),
            request_id: string_field(record, "id"),
            match_count: record.get("matchCount").and_then(count_value),
        }
    }

    /// Identity of the row in the list. Two requests rarely share all three.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.operation_id, self.request_id, self.timestamp)
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// A trace, exception or dependency correlated to an invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRow {
    pub timestamp: String,
    pub item_type: String,
    pub log_level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity_level: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub result_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub role_name: String,
}

impl DetailRow {
    pub fn from_record(record: &Record) -> Self {
        let severity_level = number_field(record, "severityLevel").map(|value| value as i64);
        let log_level = match string_field(record, "loglevel") {
            level if level.is_empty() => severity_label(severity_level).to_string(),
            level => level,
        };
        let message = ["message", "outerMessage", "name"]
            .iter()
            .map(|key| string_field(record, key))
            .find(|value| !value.is_empty())
            .unwrap_or_default();

        Self {
            timestamp: string_field(record, "timestamp"),
            item_type: string_field(record, "itemType"),
            log_level,
            message,
            severity_level,
            result_code: string_field(record, "resultCode"),
            success: bool_field(record, "success"),
            duration_ms: number_field(record, "duration"),
            kind: string_field(record, "type"),
            role_name: string_field(record, "cloud_RoleName"),
        }
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

pub fn invocation_rows(records: &[Record]) -> Vec<InvocationRow> {
    records.iter().map(InvocationRow::from_record).collect()
}

/// Detail rows without the request itself, oldest first.
pub fn detail_rows(records: &[Record]) -> Vec<DetailRow> {
    let mut rows: Vec<DetailRow> = records
        .iter()
        .map(DetailRow::from_record)
        .filter(|row| !row.item_type.eq_ignore_ascii_case("request"))
        .collect();
    rows.sort_by_key(DetailRow::at);
    rows
}

/// Explicit success wins. Otherwise result code `0` or any code in
/// `200..=399` counts as success.
pub fn derive_success(explicit: Option<bool>, result_code: &str) -> bool {
    if let Some(success) = explicit {
        return success;
    }
    let code = result_code.trim();
    code == "0"
        || code
            .parse::<i64>()
            .map(|value| (200..=399).contains(&value))
            .unwrap_or(false)
}

/// Time from the entry at `idx` to the next entry, or to the end of the
/// invocation for the last one. Never negative.
pub fn approximate_entry_duration_ms(
    rows: &[DetailRow],
    idx: usize,
    invocation: Option<&InvocationRow>,
) -> Option<f64> {
    let at = rows.get(idx)?.at()?;
    let end = match rows.get(idx + 1) {
        Some(next) => next.at()?,
        None => {
            let invocation = invocation?;
            let started = invocation.started_at()?;
            started + chrono::Duration::microseconds((invocation.duration_ms * 1000.0) as i64)
        }
    };
    let delta = (end - at).num_microseconds()? as f64 / 1000.0;
    Some(delta.max(0.0))
}

fn severity_label(level: Option<i64>) -> &'static str {
    match level {
        Some(0) => "Verbose",
        Some(1) => "Information",
        Some(2) => "Warning",
        Some(3) => "Error",
        Some(4) => "Critical",
        _ => "",
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn string_field(record: &Record, key: &str) -> String {
    match record.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn bool_field(record: &Record, key: &str) -> Option<bool> {
    match record.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|value| value != 0),
        _ => None,
    }
}

fn number_field(record: &Record, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn count_value(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().expect("object").clone()
    }

    fn detail(timestamp: &str) -> DetailRow {
        DetailRow::from_record(&record(json!({
            "timestamp": timestamp,
            "itemType": "trace",
            "message": "m",
        })))
    }

    #[test]
    fn explicit_success_wins_over_result_code() {
        assert!(derive_success(Some(true), "500"));
        assert!(!derive_success(Some(false), "200"));
    }

    #[test]
    fn result_code_fallback() {
        assert!(derive_success(None, "200"));
        assert!(derive_success(None, "399"));
        assert!(derive_success(None, "0"));
        assert!(!derive_success(None, "400"));
        assert!(!derive_success(None, "199"));
        assert!(!derive_success(None, "Faulted"));
        assert!(!derive_success(None, ""));
    }

    #[test]
    fn invocation_row_defaults_missing_fields() {
        let row = InvocationRow::from_record(&record(json!({
            "operation_Id": "op-1",
            "resultCode": 204,
        })));
        assert_eq!(row.operation_id, "op-1");
        assert_eq!(row.result_code, "204");
        assert!(row.success);
        assert_eq!(row.name, "");
        assert_eq!(row.duration_ms, 0.0);
        assert_eq!(row.match_count, None);
    }

    #[test]
    fn match_count_only_when_numeric() {
        let numeric = InvocationRow::from_record(&record(json!({"matchCount": 3})));
        assert_eq!(numeric.match_count, Some(3));
        let text = InvocationRow::from_record(&record(json!({"matchCount": "3"})));
        assert_eq!(text.match_count, None);
    }

    #[test]
    fn detail_rows_drop_requests_and_sort_ascending() {
        let records = vec![
            record(json!({"timestamp": "2024-05-01T10:00:02Z", "itemType": "trace", "message": "b"})),
            record(json!({"timestamp": "2024-05-01T10:00:00Z", "itemType": "request", "name": "GET /"})),
            record(json!({"timestamp": "2024-05-01T10:00:01Z", "itemType": "exception", "outerMessage": "boom"})),
        ];
        let rows = detail_rows(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message, "boom");
        assert_eq!(rows[1].message, "b");
    }

    #[test]
    fn log_level_falls_back_to_severity() {
        let row = DetailRow::from_record(&record(json!({"severityLevel": 3, "loglevel": ""})));
        assert_eq!(row.log_level, "Error");
        let explicit =
            DetailRow::from_record(&record(json!({"severityLevel": 1, "loglevel": "Debug"})));
        assert_eq!(explicit.log_level, "Debug");
    }

    #[test]
    fn duration_until_next_entry() {
        let rows = vec![
            detail("2024-05-01T10:00:00.000Z"),
            detail("2024-05-01T10:00:00.250Z"),
        ];
        assert_eq!(approximate_entry_duration_ms(&rows, 0, None), Some(250.0));
    }

    #[test]
    fn last_entry_runs_until_invocation_end() {
        let rows = vec![detail("2024-05-01T10:00:00.400Z")];
        let invocation = InvocationRow::from_record(&record(json!({
            "timestamp": "2024-05-01T10:00:00.000Z",
            "duration": 1000.0,
        })));
        assert_eq!(
            approximate_entry_duration_ms(&rows, 0, Some(&invocation)),
            Some(600.0)
        );
        assert_eq!(approximate_entry_duration_ms(&rows, 0, None), None);
    }

    #[test]
    fn duration_never_negative() {
        let rows = vec![detail("2024-05-01T10:00:05Z")];
        let invocation = InvocationRow::from_record(&record(json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "duration": 10.0,
        })));
        assert_eq!(
            approximate_entry_duration_ms(&rows, 0, Some(&invocation)),
            Some(0.0)
        );
    }

    #[test]
    fn unparseable_timestamp_has_no_duration() {
        let rows = vec![detail("yesterday"), detail("2024-05-01T10:00:00Z")];
        assert_eq!(approximate_entry_duration_ms(&rows, 0, None), None);
    }
}
