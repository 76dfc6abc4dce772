use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::mapper::map_chat_completion;
use modellink_core::stream::aggregate_response;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};

use super::descriptor;
use super::openai_chat::{
    CHAT_BLANK_AS_ABSENT, CHAT_FAILURE_MESSAGE, CHAT_PATH, CHAT_SUCCESS_MESSAGE, build_chat_body,
};

/// Chat completion requested as an event stream and aggregated into one envelope.
pub struct OpenAiCompletionsTool;

#[async_trait]
impl Tool for OpenAiCompletionsTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "openai_completions",
            "Streaming chat completion, aggregated into a single result.",
            HttpMethod::Post,
            CHAT_PATH,
            true,
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
        let body = build_chat_body(params)?.required("stream", true);
        Ok(InvocationRequest::post_json(context.endpoint(CHAT_PATH), body.into_json())
            .bearer_auth(&api_key)
            .streaming())
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        // Some compatible upstreams ignore `stream` and answer with one JSON body.
        let result = if response.is_success() && response.is_json() {
            map_chat_completion(&response.text().await?)?
        } else {
            aggregate_response(response).await?
        };
        sink.emit_envelope(result.into_envelope(CHAT_SUCCESS_MESSAGE));
        Ok(())
    }
}
