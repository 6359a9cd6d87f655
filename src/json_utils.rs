//! JSON helpers with consistent error reporting.
//!
//! Checkpoints, session state, weight maps, and page records all round-trip
//! through these wrappers so a malformed file is logged once and skipped
//! instead of aborting the crawl.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// JSON error with enough context to find the offending file.
#[derive(Debug)]
pub enum JsonError {
    Syntax { msg: String, line: usize, column: usize },
    Data(String),
    UnexpectedEof(String),
    Serialization(String),
}

impl fmt::Display for JsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonError::Syntax { msg, line, column } => {
                write!(f, "JSON syntax error at line {}, column {}: {}", line, column, msg)
            }
            JsonError::Data(msg) => write!(f, "JSON validation error: {}", msg),
            JsonError::UnexpectedEof(msg) => write!(f, "Incomplete JSON: {}", msg),
            JsonError::Serialization(msg) => write!(f, "JSON serialization error: {}", msg),
        }
    }
}

impl std::error::Error for JsonError {}

impl From<serde_json::Error> for JsonError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_syntax() {
            JsonError::Syntax {
                msg: e.to_string(),
                line: e.line(),
                column: e.column(),
            }
        } else if e.is_eof() {
            JsonError::UnexpectedEof(e.to_string())
        } else {
            JsonError::Data(e.to_string())
        }
    }
}

pub fn safe_deserialize<'a, T>(json: &'a str) -> Result<T, JsonError>
where
    T: Deserialize<'a>,
{
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Err(JsonError::Data("Empty JSON input".to_string()));
    }
    if trimmed == "null" {
        return Err(JsonError::Data("Null JSON input".to_string()));
    }
    serde_json::from_str(json).map_err(JsonError::from)
}

pub fn safe_serialize<T>(value: &T) -> Result<String, JsonError>
where
    T: Serialize,
{
    serde_json::to_string(value).map_err(|e| JsonError::Serialization(e.to_string()))
}

/// Serialize, logging failure instead of propagating it.
pub fn serialize_with_logging<T>(value: &T, context: &str) -> Option<String>
where
    T: Serialize,
{
    match safe_serialize(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("failed to serialize {}: {}", context, e);
            None
        }
    }
}

/// Deserialize, logging failure instead of propagating it.
pub fn deserialize_with_logging<'a, T>(json: &'a str, context: &str) -> Option<T>
where
    T: Deserialize<'a>,
{
    match safe_deserialize(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("failed to deserialize {}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        count: i32,
    }

    #[test]
    fn test_round_trip() {
        let data = Sample {
            name: "test".to_string(),
            count: 42,
        };
        let json = safe_serialize(&data).unwrap();
        let back: Sample = safe_deserialize(&json).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_truncated_input_classified() {
        let result: Result<Sample, JsonError> = safe_deserialize(r#"{"name":"test","count":42"#);
        assert!(matches!(result, Err(JsonError::UnexpectedEof(_))));
    }

    #[test]
    fn test_missing_field_classified() {
        let result: Result<Sample, JsonError> = safe_deserialize(r#"{"name":"test"}"#);
        assert!(matches!(result, Err(JsonError::Data(_))));
    }

    #[test]
    fn test_empty_and_null_rejected() {
        let empty: Result<Sample, JsonError> = safe_deserialize("");
        assert!(matches!(empty, Err(JsonError::Data(_))));
        let null: Result<Sample, JsonError> = safe_deserialize("null");
        assert!(matches!(null, Err(JsonError::Data(_))));
    }

    #[test]
    fn test_logging_wrappers() {
        let parsed: Option<Sample> =
            deserialize_with_logging(r#"{"name":"a","count":1}"#, "sample");
        assert!(parsed.is_some());

        let bad: Option<Sample> = deserialize_with_logging("{broken", "sample");
        assert!(bad.is_none());

        let json = serialize_with_logging(
            &Sample {
                name: "a".to_string(),
                count: 1,
            },
            "sample",
        );
        assert!(json.is_some());
    }
}
