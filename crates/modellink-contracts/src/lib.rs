use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Marker the host leaves in place of a template variable the caller never bound.
pub const UNSET_SENTINEL: &str = "variable";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const STREAMING_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub type ToolParameters = Map<String, Value>;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStage {
    Normalize,
    Build,
    Send,
    Map,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Header list with case-insensitive names. Insertion order is kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) =
            self.entries.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            slot.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Named text parts, sent as `multipart/form-data` without filenames.
    Multipart(Vec<(String, String)>),
}

/// One outbound call. Built by a tool, consumed once by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: Headers,
    pub body: RequestBody,
    pub timeout: Duration,
    pub streaming: bool,
}

impl InvocationRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: Headers::new(),
            body: RequestBody::Empty,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            streaming: false,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        let mut request = Self::get(url);
        request.method = HttpMethod::Post;
        request.headers.insert("Content-Type", "application/json");
        request.body = RequestBody::Json(body);
        request
    }

    pub fn post_multipart(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        let mut request = Self::get(url);
        request.method = HttpMethod::Post;
        request.body = RequestBody::Multipart(fields);
        request
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Marks the response as an SSE body and widens the timeout to the streaming budget.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self.timeout = STREAMING_REQUEST_TIMEOUT;
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub model: Option<String>,
    pub id: Option<String>,
    pub created: Option<i64>,
    pub finish_reason: Option<String>,
    pub service_tier: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub prompt_tokens_details: Option<Value>,
    pub completion_tokens_details: Option<Value>,
}

/// Fully materialized chat output. Serializes as the envelope `data` block;
/// `metadata` travels separately.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub content: String,
    pub role: String,
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    #[serde(skip)]
    pub metadata: ResultMetadata,
}

impl AggregatedResult {
    pub fn into_envelope(self, message: impl Into<String>) -> NormalizedEnvelope {
        let metadata = serde_json::to_value(&self.metadata).ok();
        let data = serde_json::to_value(&self).ok();
        NormalizedEnvelope {
            success: true,
            message: message.into(),
            data,
            error: None,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, ToSchema)]
pub struct NormalizedEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl NormalizedEnvelope {
    pub fn success(message: impl Into<String>, data: Value) -> Self {
        Self { success: true, message: message.into(), data: Some(data), error: None, metadata: None }
    }

    /// Failure envelope. An empty error text falls back to `fallback_message`
    /// for the human-readable part.
    pub fn failure(error: impl Into<String>, fallback_message: &str) -> Self {
        let error = error.into();
        let message = if error.trim().is_empty() { fallback_message.to_string() } else { error.clone() };
        Self { success: false, message, data: None, error: Some(error), metadata: None }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct BlobMeta {
    pub file_name: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl BinaryArtifact {
    pub fn meta(&self) -> BlobMeta {
        BlobMeta { file_name: self.file_name.clone(), mime_type: self.mime_type.clone() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolMessage {
    Json(NormalizedEnvelope),
    Blob(BinaryArtifact),
}

impl ToolMessage {
    pub fn as_envelope(&self) -> Option<&NormalizedEnvelope> {
        match self {
            Self::Json(envelope) => Some(envelope),
            Self::Blob(_) => None,
        }
    }

    pub fn as_blob(&self) -> Option<&BinaryArtifact> {
        match self {
            Self::Json(_) => None,
            Self::Blob(artifact) => Some(artifact),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, ToSchema)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub method: HttpMethod,
    pub path: String,
    pub streaming: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, ToSchema)]
pub struct InvokeToolRequest {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: ToolParameters,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolMessageView {
    Json { json: NormalizedEnvelope },
    Blob { meta: BlobMeta, data: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, ToSchema)]
pub struct InvokeToolResponse {
    pub messages: Vec<ToolMessageView>,
}
