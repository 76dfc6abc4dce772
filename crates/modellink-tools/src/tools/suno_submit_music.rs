use std::time::Duration;

use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::BodyFields;
use modellink_core::mapper::json_or_raw;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};

use super::{descriptor, emit_success, success_body};

pub(crate) const SUNO_TIMEOUT: Duration = Duration::from_secs(120);
const SUBMIT_PATH: &str = "/suno/submit/music";
const SUNO_SUBMIT_BLANK_AS_ABSENT: &[&str] =
    &["apiKey", "prompt", "mv", "title", "tags", "task", "continue_at", "continue_clip_id"];

pub struct SunoSubmitMusicTool;

fn build_submit_body(params: &ToolParams) -> Result<BodyFields, CoreError> {
    let mut body = BodyFields::new();
    for field in ["prompt", "mv", "title"] {
        params.required(field)?;
        body.insert_opt(field, params.value(field).cloned());
    }
    for field in ["tags", "task", "continue_at", "continue_clip_id"] {
        body.insert_opt(field, params.value(field).cloned());
    }
    Ok(body)
}

#[async_trait]
impl Tool for SunoSubmitMusicTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "suno_submit_music",
            "Submits a music generation task.",
            HttpMethod::Post,
            SUBMIT_PATH,
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        SUNO_SUBMIT_BLANK_AS_ABSENT
    }

    fn failure_message(&self) -> &'static str {
        "task submission failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("apiKey")?;
        let body = build_submit_body(params)?;
        Ok(InvocationRequest::post_json(context.endpoint(SUBMIT_PATH), body.into_json())
            .bearer_auth(&api_key)
            .timeout(SUNO_TIMEOUT))
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let body = success_body(response).await?;
        emit_success(sink, "task submitted", json_or_raw(&body));
        Ok(())
    }
}
