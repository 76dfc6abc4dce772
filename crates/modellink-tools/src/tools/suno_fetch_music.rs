use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::path_segment;
use modellink_core::mapper::json_or_raw;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};

use super::suno_submit_music::SUNO_TIMEOUT;
use super::{descriptor, emit_success, success_body};

const FETCH_PATH: &str = "/suno/fetch";

pub struct SunoFetchMusicTool;

#[async_trait]
impl Tool for SunoFetchMusicTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "suno_fetch_music",
            "Fetches the state of a music task.",
            HttpMethod::Get,
            "/suno/fetch/{task_id}",
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        &["apiKey", "task_id"]
    }

    fn failure_message(&self) -> &'static str {
        "query failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("apiKey")?;
        let task_id = params.required("task_id")?;
        let url = context.endpoint(&format!("{FETCH_PATH}/{}", path_segment(&task_id)));
        Ok(InvocationRequest::get(url).bearer_auth(&api_key).timeout(SUNO_TIMEOUT))
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let body = success_body(response).await?;
        emit_success(sink, "query succeeded", json_or_raw(&body));
        Ok(())
    }
}
