//! Dialect-aware request parameters
//!
//! The query dialect carries parameters as form fields, including the
//! indexed `Attribute.N.Name` / `Attribute.N.Value` convention; the JSON
//! dialect carries them as top-level fields of a single object. Handlers
//! read through one interface and never care which dialect arrived.

use std::collections::HashMap;

use serde_json::{Map, Value};

use queuestack_core::SqsError;

pub enum Params {
    Query(HashMap<String, String>),
    Json(Map<String, Value>),
}

impl Params {
    pub fn from_form(body: &[u8]) -> Self {
        let fields = form_urlencoded::parse(body)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::Query(fields)
    }

    pub fn from_json(body: &[u8]) -> Result<Self, SqsError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| SqsError::invalid_parameter(format!("Failed to parse JSON request: {e}")))?;
        match value {
            Value::Object(fields) => Ok(Self::Json(fields)),
            _ => Err(SqsError::invalid_parameter(
                "Request body must be a JSON object",
            )),
        }
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self {
            Self::Query(fields) => fields.get(name).map(String::as_str),
            Self::Json(fields) => fields.get(name).and_then(Value::as_str),
        }
    }

    /// A required, non-empty string field.
    pub fn required(&self, name: &str) -> Result<&str, SqsError> {
        match self.str(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(SqsError::missing_parameter(format!("{name} is required"))),
        }
    }

    /// Integer field; both dialects accept string-encoded numbers.
    pub fn u32(&self, name: &str) -> Option<u32> {
        match self {
            Self::Query(fields) => fields.get(name).and_then(|v| v.parse().ok()),
            Self::Json(fields) => fields.get(name).and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    .map(|n| n as u32)
            }),
        }
    }

    /// The queue attribute map. Query dialect: `Attribute.N.Name` /
    /// `Attribute.N.Value`, 1-based and contiguous, stopping at the first
    /// missing name. JSON dialect: the `Attributes` object.
    pub fn attributes(&self) -> HashMap<String, String> {
        match self {
            Self::Query(fields) => {
                let mut attrs = HashMap::new();
                for i in 1.. {
                    let name = fields.get(&format!("Attribute.{i}.Name"));
                    match name {
                        Some(name) if !name.is_empty() => {
                            let value = fields
                                .get(&format!("Attribute.{i}.Value"))
                                .cloned()
                                .unwrap_or_default();
                            attrs.insert(name.clone(), value);
                        }
                        _ => break,
                    }
                }
                attrs
            }
            Self::Json(fields) => json_string_map(fields.get("Attributes")),
        }
    }

    /// User message attributes, carried through opaquely. Query dialect:
    /// `MessageAttribute.N.Name` / `MessageAttribute.N.Value.StringValue`.
    pub fn message_attributes(&self) -> HashMap<String, String> {
        match self {
            Self::Query(fields) => {
                let mut attrs = HashMap::new();
                for i in 1.. {
                    let name = fields.get(&format!("MessageAttribute.{i}.Name"));
                    match name {
                        Some(name) if !name.is_empty() => {
                            let value = fields
                                .get(&format!("MessageAttribute.{i}.Value.StringValue"))
                                .cloned()
                                .unwrap_or_default();
                            attrs.insert(name.clone(), value);
                        }
                        _ => break,
                    }
                }
                attrs
            }
            Self::Json(fields) => json_string_map(fields.get("MessageAttributes")),
        }
    }
}

/// Flatten a JSON object into a string map; non-string values keep their
/// JSON rendering.
fn json_string_map(value: Option<&Value>) -> HashMap<String, String> {
    let Some(Value::Object(fields)) = value else {
        return HashMap::new();
    };
    fields
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect()
}

/// Extract the queue name from a `QueueUrl` parameter: an absolute URL
/// whose path is `/<name>`, or just the bare name.
pub fn queue_name_from_url(queue_url: &str) -> &str {
    queue_url
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(queue_url)
}
