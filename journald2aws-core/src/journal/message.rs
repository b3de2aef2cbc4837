//! Structured journald records from `journalctl --output json`
//!
//! Every line becomes a [`JournalctlMessage`], even when it is not valid JSON:
//! a line is never dropped, it just loses its parsed fields.

use serde_json::{Map, Value};

use crate::buffer::{Chunk, DelimitingBuffer};
use crate::error::{Error, Result};

const CURSOR_FIELD: &str = "__CURSOR";

/// Timestamp fields, most preferred first (microseconds since the epoch).
const TIMESTAMP_FIELDS: &[&str] = &["_SOURCE_REALTIME_TIMESTAMP", "__REALTIME_TIMESTAMP"];

/// One journald record
#[derive(Debug, Clone, PartialEq)]
pub struct JournalctlMessage {
    /// The line as read, without its newline
    pub raw: Vec<u8>,
    /// Parsed fields; `None` if the line was not a JSON object
    pub fields: Option<Map<String, Value>>,
    /// Resumption token for `--after-cursor`
    pub cursor: Option<String>,
    /// Event time, microseconds since the Unix epoch
    pub ts_us: Option<i64>,
}

impl JournalctlMessage {
    /// Build a message from one raw line, logging (not failing) on bad input.
    pub fn from_line(raw: Vec<u8>) -> Self {
        let fields = match parse_fields(&raw) {
            Ok(map) => Some(map),
            Err(e) => {
                tracing::warn!(
                    raw = %String::from_utf8_lossy(&raw),
                    error = %e,
                    "Failed to parse journal line"
                );
                None
            }
        };

        let Some(fields) = fields else {
            return Self {
                raw,
                fields: None,
                cursor: None,
                ts_us: None,
            };
        };

        let cursor = fields
            .get(CURSOR_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string);
        let ts_us = message_timestamp(&fields);

        Self {
            raw,
            fields: Some(fields),
            cursor,
            ts_us,
        }
    }

    /// Event time in milliseconds, if known.
    pub fn ts_ms(&self) -> Option<i64> {
        self.ts_us.map(|us| us / 1000)
    }
}

fn parse_fields(raw: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Parse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// First timestamp field that parses, as integer microseconds.
fn message_timestamp(fields: &Map<String, Value>) -> Option<i64> {
    for name in TIMESTAMP_FIELDS {
        let Some(v) = fields.get(*name) else {
            continue;
        };
        match v {
            Value::String(s) => {
                if let Some(ts) = parse_timestamp_str(s) {
                    return Some(ts);
                }
                tracing::warn!(field = *name, value = %s, "Failed to parse timestamp");
            }
            Value::Number(n) => {
                if let Some(ts) = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)) {
                    return Some(ts);
                }
            }
            _ => {}
        }
    }

    let cursor = fields.get(CURSOR_FIELD).and_then(Value::as_str).unwrap_or("");
    tracing::error!(cursor, "Journal message has no valid timestamp");
    None
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Turns raw journalctl stdout into messages, one per line.
#[derive(Debug, Default)]
pub struct JournalctlMessageBuilder {
    buf: DelimitingBuffer,
}

impl JournalctlMessageBuilder {
    pub fn new() -> Self {
        Self {
            buf: DelimitingBuffer::new(),
        }
    }

    /// Feed stdout bytes; returns a message for every line completed so far.
    ///
    /// An empty `data` flushes a trailing unterminated line and closes the builder.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<JournalctlMessage>> {
        Ok(self
            .buf
            .feed(data)?
            .into_iter()
            .map(|chunk| match chunk {
                Chunk::Complete(line) | Chunk::Incomplete(line) => JournalctlMessage::from_line(line),
            })
            .collect())
    }
}
