use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use modellink_contracts::{
    BinaryArtifact, Headers, InvocationRequest, InvocationStage, NormalizedEnvelope,
    ToolDescriptor, ToolMessage, ToolParameters,
};
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

pub mod builder;
pub mod content;
pub mod mapper;
pub mod params;
pub mod stream;

pub use params::ToolParams;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("API request failed: {status} - {message}")]
    HttpStatus { status: u16, message: String },
    #[error("malformed stream frame: {0}")]
    MalformedStreamFrame(String),
    #[error("response failed: {code} - {message}")]
    UpstreamFailure { code: String, message: String },
    #[error("missing content: {0}")]
    MissingContent(String),
    #[error("response decode failed: {0}")]
    Decode(String),
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "Validation",
            Self::InvalidUrl(_) => "InvalidUrl",
            Self::Network(_) => "Network",
            Self::HttpStatus { .. } => "HttpStatus",
            Self::MalformedStreamFrame(_) => "MalformedStreamFrame",
            Self::UpstreamFailure { .. } => "UpstreamFailure",
            Self::MissingContent(_) => "MissingContent",
            Self::Decode(_) => "Decode",
        }
    }
}

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, CoreError>> + Send>>;

/// Upstream response with a lazily read body. The status is known before any
/// body byte is consumed.
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: BodyStream,
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn from_chunks(status: u16, headers: Headers, chunks: Vec<Bytes>) -> Self {
        let body = futures::stream::iter(chunks.into_iter().map(Ok));
        Self { status, reason: String::new(), headers, body: Box::pin(body) }
    }

    pub fn from_body(status: u16, headers: Headers, body: impl Into<Bytes>) -> Self {
        Self::from_chunks(status, headers, vec![body.into()])
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// True when the upstream answered with plain JSON instead of an event stream.
    pub fn is_json(&self) -> bool {
        self.content_type().is_some_and(|value| {
            value.split(';').next().is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        })
    }

    pub async fn bytes(mut self) -> Result<Vec<u8>, CoreError> {
        let mut collected = Vec::new();
        while let Some(chunk) = self.body.next().await {
            collected.extend_from_slice(&chunk?);
        }
        Ok(collected)
    }

    /// Whole body decoded with the declared charset.
    pub async fn text(self) -> Result<String, CoreError> {
        let encoding = stream::negotiate_charset(self.content_type());
        let bytes = self.bytes().await?;
        let (text, _, _) = encoding.decode(&bytes);
        Ok(text.into_owned())
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Connection failures and timeouts are [`CoreError::Network`]; a non-2xx
    /// status is still `Ok` and left to the caller.
    async fn send(&self, request: InvocationRequest) -> Result<HttpResponse, CoreError>;
}

/// Host-side receiver of invocation output.
pub trait ResultSink: Send {
    fn emit_envelope(&mut self, envelope: NormalizedEnvelope);
    fn emit_binary(&mut self, artifact: BinaryArtifact);
}

#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Vec<ToolMessage>,
}

impl CollectingSink {
    pub fn messages(&self) -> &[ToolMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<ToolMessage> {
        self.messages
    }
}

impl ResultSink for CollectingSink {
    fn emit_envelope(&mut self, envelope: NormalizedEnvelope) {
        self.messages.push(ToolMessage::Json(envelope));
    }

    fn emit_binary(&mut self, artifact: BinaryArtifact) {
        self.messages.push(ToolMessage::Blob(artifact));
    }
}

/// What a tool may reach while building its request.
#[derive(Clone)]
pub struct ToolContext {
    pub base_url: String,
    pub transport: Arc<dyn HttpTransport>,
}

impl ToolContext {
    pub fn endpoint(&self, path: &str) -> String {
        builder::endpoint_url(&self.base_url, path)
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Parameter names whose blank strings count as not supplied.
    fn blank_as_absent(&self) -> &'static [&'static str] {
        &[]
    }

    /// Message used when a failure carries no text of its own.
    fn failure_message(&self) -> &'static str {
        "request failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError>;

    async fn map_response(
        &self,
        params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError>;
}

/// Counts what reaches the host so an invocation can never end silently.
struct TrackingSink<'a> {
    inner: &'a mut dyn ResultSink,
    emitted: usize,
}

impl ResultSink for TrackingSink<'_> {
    fn emit_envelope(&mut self, envelope: NormalizedEnvelope) {
        self.emitted += 1;
        self.inner.emit_envelope(envelope);
    }

    fn emit_binary(&mut self, artifact: BinaryArtifact) {
        self.emitted += 1;
        self.inner.emit_binary(artifact);
    }
}

/// Runs tools: normalize, build, send, map. Every stage returns a `Result`;
/// only [`ToolEngine::invoke`] turns an error into a failure envelope.
#[derive(Clone)]
pub struct ToolEngine {
    transport: Arc<dyn HttpTransport>,
    base_url: String,
}

impl ToolEngine {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self { transport, base_url: base_url.into() }
    }

    pub async fn invoke(
        &self,
        tool: &dyn Tool,
        parameters: ToolParameters,
        sink: &mut dyn ResultSink,
    ) {
        let descriptor = tool.descriptor();
        let invocation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "tool_invocation",
            tool = %descriptor.name,
            invocation_id = %invocation_id
        );

        async move {
            let mut tracking = TrackingSink { inner: sink, emitted: 0 };
            let outcome = match self.execute(tool, parameters, &mut tracking).await {
                Ok(()) if tracking.emitted == 0 => Err(CoreError::MissingContent(
                    "tool produced no output".to_string(),
                )),
                other => other,
            };

            match outcome {
                Ok(()) => info!(event = "tool.invocation.completed", emitted = tracking.emitted),
                Err(err) => {
                    warn!(
                        event = "tool.invocation.failed",
                        error_kind = err.kind(),
                        error = %err
                    );
                    tracking.emit_envelope(NormalizedEnvelope::failure(
                        err.to_string(),
                        tool.failure_message(),
                    ));
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn invoke_collect(&self, tool: &dyn Tool, parameters: ToolParameters) -> Vec<ToolMessage> {
        let mut sink = CollectingSink::default();
        self.invoke(tool, parameters, &mut sink).await;
        sink.into_messages()
    }

    pub async fn execute(
        &self,
        tool: &dyn Tool,
        parameters: ToolParameters,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let params = self
            .run_stage(InvocationStage::Normalize, async {
                Ok(ToolParams::normalize(parameters, tool.blank_as_absent()))
            })
            .await?;

        let context = ToolContext {
            base_url: self.base_url.clone(),
            transport: Arc::clone(&self.transport),
        };
        let request = self
            .run_stage(InvocationStage::Build, tool.build_request(&params, &context))
            .await?;

        let method = request.method.as_str();
        let url = request.url.clone();
        let response = self
            .run_stage(InvocationStage::Send, async {
                let response = self.transport.send(request).await?;
                info!(event = "upstream.response", method, url = %url, status = response.status);
                Ok(response)
            })
            .await?;

        self.run_stage(InvocationStage::Map, tool.map_response(&params, response, sink)).await
    }

    async fn run_stage<T, F>(&self, stage: InvocationStage, future: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>>,
    {
        let span = info_span!("pipeline_stage", stage = ?stage);
        future.instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use modellink_contracts::{HttpMethod, RequestBody};
    use serde_json::{Value, json};

    use super::*;
    use crate::builder::BodyFields;
    use crate::mapper::{ensure_success, map_chat_completion};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum UpstreamBehavior {
        Ok,
        Status(u16),
        Unreachable,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct EngineFixture<'a> {
        name: &'a str,
        params: &'a str,
        upstream: UpstreamBehavior,
        body: &'a str,
    }

    impl<'a> EngineFixture<'a> {
        fn parse(raw: &'a str) -> Self {
            let mut fixture =
                Self { name: "unnamed", params: "{}", upstream: UpstreamBehavior::Ok, body: "{}" };

            for line in raw.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    continue;
                };
                let value = value.trim();
                match key.trim() {
                    "name" => fixture.name = value,
                    "params" => fixture.params = value,
                    "body" => fixture.body = value,
                    "upstream" => {
                        fixture.upstream = match value {
                            "ok" => UpstreamBehavior::Ok,
                            "unreachable" => UpstreamBehavior::Unreachable,
                            status => UpstreamBehavior::Status(
                                status.parse().expect("upstream must be ok, unreachable or a status"),
                            ),
                        }
                    }
                    other => panic!("unsupported fixture key: {other}"),
                }
            }

            fixture
        }
    }

    struct FakeTransport {
        behavior: UpstreamBehavior,
        body: String,
        sent: Mutex<Vec<InvocationRequest>>,
    }

    #[async_trait]
    impl HttpTransport for FakeTransport {
        async fn send(&self, request: InvocationRequest) -> Result<HttpResponse, CoreError> {
            self.sent.lock().expect("lock is not poisoned").push(request);
            let headers: Headers = [("content-type", "application/json")].into_iter().collect();
            match self.behavior {
                UpstreamBehavior::Ok => Ok(HttpResponse::from_body(200, headers, self.body.clone())),
                UpstreamBehavior::Status(status) => {
                    Ok(HttpResponse::from_body(status, headers, self.body.clone()))
                }
                UpstreamBehavior::Unreachable => {
                    Err(CoreError::Network("connection refused".to_string()))
                }
            }
        }
    }

    /// Minimal chat tool: required `apiKey` and `prompt`, optional `temperature`.
    struct EchoChatTool;

    #[async_trait]
    impl Tool for EchoChatTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "echo_chat".to_string(),
                description: "test tool".to_string(),
                method: HttpMethod::Post,
                path: "/v1/chat/completions".to_string(),
                streaming: false,
            }
        }

        fn blank_as_absent(&self) -> &'static [&'static str] {
            &["apiKey", "prompt"]
        }

        fn failure_message(&self) -> &'static str {
            "chat failed"
        }

        async fn build_request(
            &self,
            params: &ToolParams,
            context: &ToolContext,
        ) -> Result<InvocationRequest, CoreError> {
            let api_key = params.required("apiKey")?;
            let body = BodyFields::new()
                .required("messages", json!([{"role": "user", "content": params.required("prompt")?}]))
                .optional("temperature", params.value("temperature").cloned())
                .into_json();
            Ok(InvocationRequest::post_json(context.endpoint("/v1/chat/completions"), body)
                .bearer_auth(&api_key))
        }

        async fn map_response(
            &self,
            _params: &ToolParams,
            response: HttpResponse,
            sink: &mut dyn ResultSink,
        ) -> Result<(), CoreError> {
            let body = ensure_success(response).await?.text().await?;
            sink.emit_envelope(map_chat_completion(&body)?.into_envelope("chat completed"));
            Ok(())
        }
    }

    /// Succeeds without emitting anything.
    struct SilentTool;

    #[async_trait]
    impl Tool for SilentTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: "silent".to_string(),
                description: "test tool".to_string(),
                method: HttpMethod::Get,
                path: "/".to_string(),
                streaming: false,
            }
        }

        async fn build_request(
            &self,
            _params: &ToolParams,
            context: &ToolContext,
        ) -> Result<InvocationRequest, CoreError> {
            Ok(InvocationRequest::get(context.endpoint("/")))
        }

        async fn map_response(
            &self,
            _params: &ToolParams,
            _response: HttpResponse,
            _sink: &mut dyn ResultSink,
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn assert_snapshot(name: &str, actual: &str, expected: &str) {
        let actual = actual.trim();
        let expected = expected.trim();
        assert_eq!(
            actual, expected,
            "snapshot mismatch for fixture `{name}`\n\nactual:\n{actual}\n\nexpected:\n{expected}"
        );
    }

    /// Compact JSON with object keys sorted at every level.
    fn canonical(value: &Value) -> String {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<_> = map.iter().collect();
                entries.sort_by(|left, right| left.0.cmp(right.0));
                let fields: Vec<String> = entries
                    .into_iter()
                    .map(|(key, value)| format!("{}:{}", Value::from(key.as_str()), canonical(value)))
                    .collect();
                format!("{{{}}}", fields.join(","))
            }
            Value::Array(items) => {
                format!("[{}]", items.iter().map(canonical).collect::<Vec<_>>().join(","))
            }
            other => other.to_string(),
        }
    }

    fn render_messages(messages: &[ToolMessage], sent: &[InvocationRequest]) -> String {
        let mut lines = vec![format!("requests={}", sent.len())];
        if let Some(RequestBody::Json(body)) = sent.first().map(|request| &request.body) {
            lines.push(format!("request_body={}", canonical(body)));
        }
        for message in messages {
            match message {
                ToolMessage::Json(envelope) => lines.push(format!(
                    "json={}",
                    canonical(&serde_json::to_value(envelope).expect("envelope serializes"))
                )),
                ToolMessage::Blob(artifact) => lines.push(format!("blob={}", artifact.file_name)),
            }
        }
        lines.join("\n")
    }

    async fn check_fixture(raw_fixture: &str, expected_snapshot: &str) {
        let fixture = EngineFixture::parse(raw_fixture);
        let transport = Arc::new(FakeTransport {
            behavior: fixture.upstream,
            body: fixture.body.to_string(),
            sent: Mutex::new(Vec::new()),
        });
        let engine = ToolEngine::new(transport.clone(), "http://upstream.test");
        let parameters = match serde_json::from_str::<Value>(fixture.params) {
            Ok(Value::Object(map)) => map,
            other => panic!("params fixture must be an object, got {other:?}"),
        };
        let messages = engine.invoke_collect(&EchoChatTool, parameters).await;
        let sent = transport.sent.lock().expect("lock is not poisoned");
        assert_snapshot(fixture.name, &render_messages(&messages, &sent), expected_snapshot);
    }

    #[tokio::test]
    async fn engine_fixtures() {
        let fixtures = [
            (
                r#"
name=success_with_sentinel_dropped
params={"apiKey":"sk-1","prompt":"hi","temperature":"variable"}
body={"model":"gpt-4o","choices":[{"message":{"content":"hello"},"finish_reason":"stop"}]}
"#,
                r#"
requests=1
request_body={"messages":[{"content":"hi","role":"user"}]}
json={"data":{"content":"hello","finishReason":"stop","role":"assistant"},"message":"chat completed","metadata":{"created":null,"finishReason":"stop","id":null,"model":"gpt-4o","serviceTier":null},"success":true}
"#,
            ),
            (
                r#"
name=missing_required_skips_network
params={"apiKey":"sk-1","prompt":"   "}
"#,
                r#"
requests=0
json={"error":"validation failed: missing required parameter: prompt","message":"validation failed: missing required parameter: prompt","success":false}
"#,
            ),
            (
                r#"
name=rate_limited
params={"apiKey":"sk-1","prompt":"hi"}
upstream=429
body={"error":{"message":"rate limited"}}
"#,
                r#"
requests=1
request_body={"messages":[{"content":"hi","role":"user"}]}
json={"error":"API request failed: 429 - rate limited","message":"API request failed: 429 - rate limited","success":false}
"#,
            ),
            (
                r#"
name=unreachable_upstream
params={"apiKey":"sk-1","prompt":"hi","temperature":0.2}
upstream=unreachable
"#,
                r#"
requests=1
request_body={"messages":[{"content":"hi","role":"user"}],"temperature":0.2}
json={"error":"network error: connection refused","message":"network error: connection refused","success":false}
"#,
            ),
        ];

        for (fixture, expected) in fixtures {
            check_fixture(fixture, expected).await;
        }
    }

    #[tokio::test]
    async fn request_carries_auth_and_endpoint() {
        let transport = Arc::new(FakeTransport {
            behavior: UpstreamBehavior::Ok,
            body: r#"{"choices":[{"message":{"content":"ok"}}]}"#.to_string(),
            sent: Mutex::new(Vec::new()),
        });
        let engine = ToolEngine::new(transport.clone(), "http://upstream.test/");
        let parameters =
            json!({"apiKey": "sk-1", "prompt": "hi"}).as_object().cloned().expect("object");
        engine.invoke_collect(&EchoChatTool, parameters).await;

        let sent = transport.sent.lock().expect("lock is not poisoned");
        assert_eq!(sent[0].url, "http://upstream.test/v1/chat/completions");
        assert_eq!(sent[0].headers.get("authorization"), Some("Bearer sk-1"));
    }

    #[tokio::test]
    async fn silent_success_becomes_failure_envelope() {
        let transport = Arc::new(FakeTransport {
            behavior: UpstreamBehavior::Ok,
            body: "{}".to_string(),
            sent: Mutex::new(Vec::new()),
        });
        let engine = ToolEngine::new(transport, "http://upstream.test");
        let messages = engine.invoke_collect(&SilentTool, ToolParameters::new()).await;
        assert_eq!(messages.len(), 1);
        let envelope = messages[0].as_envelope().expect("json message");
        assert!(!envelope.success);
        assert_eq!(envelope.message, "missing content: tool produced no output");
    }
}
