use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use modellink_contracts::{AggregatedResult, BinaryArtifact, ResultMetadata, UsageSummary};
use rand::Rng;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::content::render;
use crate::{CoreError, HttpResponse, ResultSink};

const FILE_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const FILE_SUFFIX_LEN: usize = 7;
const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Passes 2xx responses through. Anything else is read to the end and turned
/// into [`CoreError::HttpStatus`] with the most specific message the body offers.
pub async fn ensure_success(response: HttpResponse) -> Result<HttpResponse, CoreError> {
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status;
    let reason = response.reason.clone();
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            warn!(event = "upstream.error_body.unreadable", status, error = %err);
            String::new()
        }
    };
    let message = extract_error_message(&body, &reason, status);
    warn!(event = "upstream.status_error", status, message = %message);
    Err(CoreError::HttpStatus { status, message })
}

/// `error.message`, then a string `error`, then a string `message`, then the
/// raw body, then the status reason.
pub fn extract_error_message(body: &str, reason: &str, status: u16) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let from_error = match map.get("error") {
            Some(Value::Object(inner)) => non_empty_str(inner.get("message")),
            Some(value) => non_empty_str(Some(value)),
            None => None,
        };
        if let Some(message) = from_error.or_else(|| non_empty_str(map.get("message"))) {
            return message.to_string();
        }
    }
    let body = body.trim();
    if !body.is_empty() {
        return body.to_string();
    }
    if reason.is_empty() { format!("HTTP {status}") } else { reason.to_string() }
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|text| !text.is_empty())
}

pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, CoreError> {
    serde_json::from_str(body).map_err(|err| CoreError::Decode(err.to_string()))
}

/// JSON bodies as-is; anything else wrapped as `{"raw": <text>}`.
pub fn json_or_raw(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| json!({ "raw": body }))
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    service_tier: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    prompt_tokens_details: Option<Value>,
    #[serde(default)]
    completion_tokens_details: Option<Value>,
}

pub fn map_chat_completion(body: &str) -> Result<AggregatedResult, CoreError> {
    let completion: ChatCompletion = parse_json(body)?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::MissingContent("response contains no choices".to_string()))?;
    let message = choice
        .message
        .ok_or_else(|| CoreError::MissingContent("first choice carries no message".to_string()))?;

    let content = match message.content {
        None => String::new(),
        Some(Value::String(text)) => text,
        Some(Value::Object(map)) if map.contains_key("text") => {
            map.get("text").map(render).unwrap_or_default()
        }
        Some(other) => other.to_string(),
    };
    let usage = completion.usage.map(|usage| UsageSummary {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        prompt_tokens_details: usage.prompt_tokens_details,
        completion_tokens_details: usage.completion_tokens_details,
    });

    Ok(AggregatedResult {
        content,
        role: message.role.unwrap_or_else(|| "assistant".to_string()),
        finish_reason: choice.finish_reason.clone(),
        usage,
        metadata: ResultMetadata {
            model: completion.model,
            id: completion.id,
            created: completion.created,
            finish_reason: choice.finish_reason,
            service_tier: completion.service_tier,
        },
    })
}

#[derive(Debug, Deserialize)]
struct ResponsesBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    service_tier: Option<String>,
    #[serde(default)]
    output: Vec<Value>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    input_tokens_details: Option<Value>,
    #[serde(default)]
    output_tokens_details: Option<Value>,
}

/// Non-streaming Responses API body, mapped onto the same shape the
/// streaming aggregator produces.
pub fn map_responses_body(body: &str) -> Result<AggregatedResult, CoreError> {
    let response: ResponsesBody = parse_json(body)?;
    if response.status.as_deref() == Some("failed") {
        let error = response.error.as_ref();
        let field = |name: &str| {
            error.and_then(|error| error.get(name)).and_then(Value::as_str).map(str::to_string)
        };
        return Err(CoreError::UpstreamFailure {
            code: field("code").unwrap_or_else(|| "unknown_error".to_string()),
            message: field("message")
                .unwrap_or_else(|| "The model failed to generate a response.".to_string()),
        });
    }

    let mut content = collect_output_text(&response.output);
    if content.is_empty() {
        content = response.output_text.unwrap_or_default();
    }
    let finish_reason = match response.status.as_deref() {
        Some("completed") => Some("stop".to_string()),
        other => other.map(str::to_string),
    };
    let usage = response.usage.map(|usage| UsageSummary {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
        prompt_tokens_details: usage.input_tokens_details,
        completion_tokens_details: usage.output_tokens_details,
    });

    Ok(AggregatedResult {
        content,
        role: "assistant".to_string(),
        finish_reason: finish_reason.clone(),
        usage,
        metadata: ResultMetadata {
            model: response.model,
            id: response.id,
            created: response.created_at,
            finish_reason,
            service_tier: response.service_tier,
        },
    })
}

/// Concatenates `output_text` parts of every `message` output item.
pub fn collect_output_text(output: &[Value]) -> String {
    output
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("message"))
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default, rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: Option<String>,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
}

/// Inline images of the first candidate, in part order.
pub fn extract_inline_images(body: &str) -> Result<Vec<InlineImage>, CoreError> {
    let response: GenerateContentResponse = parse_json(body)?;
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::MissingContent("response contains no candidates".to_string()))?;

    let images: Vec<InlineImage> = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| {
            let inline = part.inline_data?;
            Some(InlineImage {
                data: inline.data?,
                mime_type: inline.mime_type.unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string()),
            })
        })
        .collect();

    if images.is_empty() {
        return Err(CoreError::MissingContent("no image data found in response".to_string()));
    }
    Ok(images)
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// `<prefix>_<unix seconds>_<seq>_<7 random [a-z0-9]>.<ext>`
pub fn artifact_file_name(prefix: &str, seq: usize, extension: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..FILE_SUFFIX_LEN)
        .map(|_| FILE_SUFFIX_ALPHABET[rng.gen_range(0..FILE_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}_{}_{seq}_{suffix}.{extension}", Utc::now().timestamp())
}

/// Decodes and emits each image on its own. A bad image is logged and
/// skipped; only a run where none decode is an error.
pub fn emit_inline_images(
    prefix: &str,
    images: Vec<InlineImage>,
    sink: &mut dyn ResultSink,
) -> Result<usize, CoreError> {
    let total = images.len();
    let mut emitted = 0;
    for (index, image) in images.into_iter().enumerate() {
        let bytes = match STANDARD.decode(image.data.trim()) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(event = "artifact.decode_failed", index = index + 1, total, error = %err);
                continue;
            }
        };
        let file_name =
            artifact_file_name(prefix, index + 1, extension_for_mime(&image.mime_type));
        debug!(event = "artifact.emitted", file_name = %file_name, size = bytes.len());
        sink.emit_binary(BinaryArtifact { bytes, mime_type: image.mime_type, file_name });
        emitted += 1;
    }

    if emitted == 0 {
        return Err(CoreError::MissingContent("no image in the response could be decoded".to_string()));
    }
    info!(event = "artifact.batch_completed", emitted, total);
    Ok(emitted)
}
