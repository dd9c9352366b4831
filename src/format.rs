//! Turning one line of JSON into a readable log line.

use serde_json::{Map, Value};

/// A decoded JSON log line. Built per line and dropped right after.
pub type LogRecord = Map<String, Value>;

const TIMESTAMP_KEY: &str = "@timestamp";
const LEVEL_KEY: &str = "log_level";
const APP_KEY: &str = "app_name";
const MESSAGE_KEY: &str = "message";
const ENVIRONMENT_KEY: &str = "environment";

/// Rendered in place of a field the record does not carry.
pub const MISSING_FIELD: &str = "-";

/// Decode a line as a JSON object. Anything else, including valid JSON that
/// is not an object, is `None`.
pub fn decode_record(line: &str) -> Option<LogRecord> {
    serde_json::from_str::<LogRecord>(line).ok()
}

/// `[timestamp] [level] [app] message (environment)`
pub fn format_record(record: &LogRecord) -> String {
    format!(
        "[{}] [{}] [{}] {} ({})",
        field(record, TIMESTAMP_KEY),
        field(record, LEVEL_KEY),
        field(record, APP_KEY),
        field(record, MESSAGE_KEY),
        field(record, ENVIRONMENT_KEY),
    )
}

fn field(record: &LogRecord, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => MISSING_FIELD.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_full_record() {
        let record = decode_record(
            r#"{"@timestamp":"t","log_level":"L","app_name":"A","message":"M","environment":"E"}"#,
        )
        .unwrap();
        assert_eq!(format_record(&record), "[t] [L] [A] M (E)");
    }

    #[test]
    fn test_format_missing_and_non_string_fields() {
        let record = decode_record(r#"{"message":"boot","log_level":30,"extra":1}"#).unwrap();
        assert_eq!(format_record(&record), "[-] [30] [-] boot (-)");

        assert_eq!(format_record(&LogRecord::new()), "[-] [-] [-] - (-)");
    }

    #[test]
    fn test_decode_only_accepts_objects() {
        assert!(decode_record(r#"{"a":1}"#).is_some());
        assert!(decode_record("plain text line").is_none());
        assert!(decode_record("[1,2,3]").is_none());
        assert!(decode_record("42").is_none());
        assert!(decode_record(r#"{"a":"#).is_none());
    }
}
