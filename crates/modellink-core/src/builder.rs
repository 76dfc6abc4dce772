use serde_json::{Map, Value};
use tracing::warn;

/// Outbound body under construction. Optional members are written only when
/// present: absent keys and explicit nulls mean different things upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyFields {
    fields: Map<String, Value>,
}

impl BodyFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn optional<V: Into<Value>>(mut self, key: &str, value: Option<V>) -> Self {
        self.insert_opt(key, value.map(Into::into));
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    pub fn insert_opt(&mut self, key: &str, value: Option<Value>) {
        if let Some(value) = value {
            self.fields.insert(key.to_string(), value);
        }
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.fields)
    }

    /// Flattens into named text parts for `multipart/form-data`.
    pub fn into_multipart(self) -> Vec<(String, String)> {
        self.fields.into_iter().map(|(key, value)| (key, form_text(&value))).collect()
    }
}

pub fn form_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Closed value set for one parameter of one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConstraint {
    pub model: &'static str,
    pub param: &'static str,
    pub allowed: &'static [&'static str],
    pub fallback: &'static str,
}

/// Out-of-range values are replaced with the constraint's fallback instead of
/// being rejected.
pub fn constrain(constraints: &[ModelConstraint], model: &str, param: &str, value: Value) -> Value {
    let Some(constraint) =
        constraints.iter().find(|constraint| constraint.model == model && constraint.param == param)
    else {
        return value;
    };
    let requested = form_text(&value);
    if constraint.allowed.contains(&requested.as_str()) {
        return value;
    }
    warn!(
        event = "request.param.coerced",
        model,
        param,
        requested = %requested,
        fallback = constraint.fallback
    );
    Value::String(constraint.fallback.to_string())
}

pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub fn path_segment(raw: &str) -> String {
    urlencoding::encode(raw.trim()).into_owned()
}
