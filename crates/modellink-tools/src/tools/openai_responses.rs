use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::BodyFields;
use modellink_core::content::build_responses_input;
use modellink_core::mapper::map_responses_body;
use modellink_core::stream::aggregate_response;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};
use serde_json::{Value, json};
use tracing::debug;

use super::descriptor;
use super::openai_chat::{CHAT_FAILURE_MESSAGE, CHAT_SUCCESS_MESSAGE, DEFAULT_CHAT_MODEL};

const RESPONSES_PATH: &str = "/v1/responses";

/// Every optional field here treats an empty string as not supplied.
const RESPONSES_BLANK_AS_ABSENT: &[&str] = &[
    "apiKey",
    "model",
    "prompt",
    "instructions",
    "temperature",
    "maxOutputTokens",
    "maxCompletionTokens",
    "topP",
    "stop",
    "tools",
    "toolChoice",
    "truncation",
    "reasoning",
    "metadata",
    "store",
    "include",
    "previousResponseId",
];

const PASSTHROUGH_FIELDS: &[(&str, &str)] = &[
    ("instructions", "instructions"),
    ("temperature", "temperature"),
    ("topP", "top_p"),
    ("stop", "stop"),
    ("toolChoice", "tool_choice"),
    ("truncation", "truncation"),
    ("store", "store"),
    ("previousResponseId", "previous_response_id"),
];

/// `POST /v1/responses`. Streams by default; `stream=false` gets a single JSON body.
pub struct OpenAiResponsesTool;

fn stream_enabled(params: &ToolParams) -> bool {
    match params.value("stream") {
        None => true,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !matches!(text.trim().to_ascii_lowercase().as_str(), "false" | "0"),
        Some(Value::Number(number)) => number.as_f64().is_none_or(|n| n != 0.0),
        Some(_) => true,
    }
}

/// `reasoning` is either a JSON object or a bare effort level.
fn reasoning_field(params: &ToolParams) -> Option<Value> {
    match params.value("reasoning")? {
        Value::String(text) => {
            Some(serde_json::from_str(text).unwrap_or_else(|_| json!({ "effort": text })))
        }
        other => Some(other.clone()),
    }
}

/// `include` is either a list or a comma-separated string.
fn include_field(params: &ToolParams) -> Option<Value> {
    match params.value("include")? {
        Value::String(text) => {
            Some(Value::from(text.split(',').map(|item| item.trim().to_string()).collect::<Vec<_>>()))
        }
        other => Some(other.clone()),
    }
}

fn build_responses_body(params: &ToolParams) -> Result<BodyFields, CoreError> {
    let input = build_responses_input(params.json("messages").as_ref(), params.str("prompt"))?;
    let mut body = BodyFields::new()
        .required("model", params.str("model").unwrap_or(DEFAULT_CHAT_MODEL))
        .required("input", input)
        .required("stream", stream_enabled(params));

    for (source, target) in PASSTHROUGH_FIELDS {
        body.insert_opt(target, params.value(source).cloned());
    }
    body.insert_opt(
        "max_output_tokens",
        params.first_present(&["maxOutputTokens", "maxCompletionTokens"]).cloned(),
    );
    // Encoded strings that fail to parse are dropped rather than sent as text.
    body.insert_opt("tools", params.json("tools"));
    body.insert_opt("metadata", params.json("metadata"));
    body.insert_opt("reasoning", reasoning_field(params));
    body.insert_opt("include", include_field(params));
    Ok(body)
}

#[async_trait]
impl Tool for OpenAiResponsesTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "openai_responses",
            "Responses API call; typed event stream aggregated into a single result.",
            HttpMethod::Post,
            RESPONSES_PATH,
            true,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        RESPONSES_BLANK_AS_ABSENT
    }

    fn failure_message(&self) -> &'static str {
        CHAT_FAILURE_MESSAGE
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("apiKey")?;
        let body = build_responses_body(params)?;
        let request = InvocationRequest::post_json(context.endpoint(RESPONSES_PATH), body.into_json())
            .bearer_auth(&api_key);
        Ok(if stream_enabled(params) { request.streaming() } else { request })
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let result = if response.is_success() && response.is_json() {
            debug!(event = "responses.non_streaming_body");
            map_responses_body(&response.text().await?)?
        } else {
            aggregate_response(response).await?
        };
        sink.emit_envelope(result.into_envelope(CHAT_SUCCESS_MESSAGE));
        Ok(())
    }
}
