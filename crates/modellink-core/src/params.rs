use modellink_contracts::{ToolParameters, UNSET_SENTINEL};
use serde_json::{Map, Value};

use crate::CoreError;

/// Caller parameters after the single normalization pass. Unset markers and
/// nulls are gone; anything still present is something the caller meant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolParams {
    values: Map<String, Value>,
}

impl ToolParams {
    /// Drops `null` and sentinel values everywhere, and blank strings for the
    /// listed names (identifiers and similar where an empty value is never meaningful).
    pub fn normalize(raw: ToolParameters, blank_as_absent: &[&str]) -> Self {
        let values = raw
            .into_iter()
            .filter(|(key, value)| {
                if is_unset(value) {
                    return false;
                }
                let blank = value.as_str().is_some_and(|text| text.trim().is_empty());
                !(blank && blank_as_absent.contains(&key.as_str()))
            })
            .collect();
        Self { values }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// String value, or the JSON rendering of a scalar (ids sometimes arrive as numbers).
    pub fn text(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(text) => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    pub fn required(&self, key: &str) -> Result<String, CoreError> {
        self.text(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| CoreError::Validation(format!("missing required parameter: {key}")))
    }

    /// Structured value for fields callers may send either as JSON or as a
    /// JSON-encoded string. Unparsable strings yield `None`.
    pub fn json(&self, key: &str) -> Option<Value> {
        match self.values.get(key)? {
            Value::String(encoded) => serde_json::from_str(encoded).ok(),
            other => Some(other.clone()),
        }
    }

    pub fn first_present(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter().find_map(|key| self.values.get(*key))
    }
}

pub fn is_unset(value: &Value) -> bool {
    value.is_null() || value.as_str() == Some(UNSET_SENTINEL)
}

/// Loose truthiness used when deciding whether caller content is worth sending.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
