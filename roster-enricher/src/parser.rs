use crate::types::{Entity, KeyPosition, Outcome, OutcomeStatus, UNKNOWN};
use serde_json::{Map, Value};
use tracing::debug;

/// Result of reading a classifier reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Parsed(Outcome),
    Unparsed { raw: String },
}

pub struct ReplyParser;

impl ReplyParser {
    /// Strips code fences and surrounding whitespace, then reads the JSON object.
    /// Missing keys take their defaults here so consumers never see holes.
    pub fn parse(entity: &Entity, raw: &str) -> Classification {
        let body = strip_fences(raw);

        let object = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(object)) => object,
            Ok(other) => {
                debug!(entity = %entity, kind = json_kind(&other), "Classifier reply is not an object");
                return Classification::Unparsed { raw: raw.trim().to_string() };
            }
            Err(e) => {
                debug!(entity = %entity, error = %e, "Classifier reply is not JSON");
                return Classification::Unparsed { raw: raw.trim().to_string() };
            }
        };

        Classification::Parsed(Outcome {
            entity: entity.clone(),
            role: text_field(&object, "role").unwrap_or_else(|| UNKNOWN.to_string()),
            organization: text_field(&object, "company").unwrap_or_else(|| UNKNOWN.to_string()),
            key_position: text_field(&object, "is_key")
                .map(|answer| KeyPosition::from_answer(&answer))
                .unwrap_or_default(),
            reason: text_field(&object, "reason").unwrap_or_default(),
            reference_link: text_field(&object, "linkedin_url").unwrap_or_default(),
            status: OutcomeStatus::Success,
        })
    }
}

/// Removes a leading ```` ```json ```` (or bare ```` ``` ````) line and a trailing fence.
pub fn strip_fences(raw: &str) -> &str {
    let mut body = raw.trim();

    if let Some(rest) = body.strip_prefix("```") {
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            // Single-line fence: ```json {...}```
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
        };
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Strings as-is, numbers and booleans stringified, null/empty treated as missing.
fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match object.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
