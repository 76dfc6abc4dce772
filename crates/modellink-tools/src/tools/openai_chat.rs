use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::BodyFields;
use modellink_core::content::build_chat_messages;
use modellink_core::mapper::map_chat_completion;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};

use super::{descriptor, success_body};

pub(crate) const CHAT_PATH: &str = "/v1/chat/completions";
pub(crate) const DEFAULT_CHAT_MODEL: &str = "gpt-4o";
pub(crate) const CHAT_SUCCESS_MESSAGE: &str = "chat completed";
pub(crate) const CHAT_FAILURE_MESSAGE: &str = "chat failed";
pub(crate) const CHAT_BLANK_AS_ABSENT: &[&str] = &["apiKey", "model", "prompt"];

/// Host parameter name to upstream field name, copied only when present.
const CHAT_OPTIONAL_FIELDS: &[(&str, &str)] = &[
    ("temperature", "temperature"),
    ("maxCompletionTokens", "max_completion_tokens"),
    ("topP", "top_p"),
    ("frequencyPenalty", "frequency_penalty"),
    ("presencePenalty", "presence_penalty"),
    ("n", "n"),
    ("stop", "stop"),
    ("responseFormat", "response_format"),
    ("reasoningEffort", "reasoning_effort"),
    ("seed", "seed"),
    ("logitBias", "logit_bias"),
    ("logprobs", "logprobs"),
    ("topLogprobs", "top_logprobs"),
];

/// `POST /v1/chat/completions`, single JSON response.
pub struct OpenAiChatTool;

/// Chat body shared by the plain and streaming chat tools.
pub(crate) fn build_chat_body(params: &ToolParams) -> Result<BodyFields, CoreError> {
    let messages = build_chat_messages(params.json("messages").as_ref(), params.str("prompt"))?;
    let model = params.str("model").unwrap_or(DEFAULT_CHAT_MODEL);

    let mut body = BodyFields::new().required("model", model).required("messages", messages);
    for (source, target) in CHAT_OPTIONAL_FIELDS {
        body.insert_opt(target, params.value(source).cloned());
    }
    Ok(body)
}

#[async_trait]
impl Tool for OpenAiChatTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "openai_chat",
            "Chat completion against an OpenAI-compatible endpoint.",
            HttpMethod::Post,
            CHAT_PATH,
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        CHAT_BLANK_AS_ABSENT
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
        let body = build_chat_body(params)?;
        Ok(InvocationRequest::post_json(context.endpoint(CHAT_PATH), body.into_json())
            .bearer_auth(&api_key))
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let body = success_body(response).await?;
        let result = map_chat_completion(&body)?;
        sink.emit_envelope(result.into_envelope(CHAT_SUCCESS_MESSAGE));
        Ok(())
    }
}
