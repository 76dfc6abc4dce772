use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::path_segment;
use modellink_core::mapper::parse_json;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};
use serde_json::{Value, json};

use super::{descriptor, emit_success, success_body};

const TEXT2VIDEO_PATH: &str = "/klingus/v1/videos/text2video";

pub struct KlingusText2VideoQueryTool;

#[async_trait]
impl Tool for KlingusText2VideoQueryTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "klingus_text2video_query",
            "Polls a text-to-video task.",
            HttpMethod::Get,
            "/klingus/v1/videos/text2video/{task_id}",
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        &["api_key", "task_id"]
    }

    fn failure_message(&self) -> &'static str {
        "task query failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("api_key")?;
        let task_id = params.required("task_id")?;
        let url = context.endpoint(&format!("{TEXT2VIDEO_PATH}/{}", path_segment(&task_id)));
        Ok(InvocationRequest::get(url)
            .header("Content-Type", "application/json")
            .bearer_auth(&api_key))
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let body: Value = parse_json(&success_body(response).await?)?;
        let data = body.get("data").cloned().unwrap_or_else(|| json!({}));
        emit_success(sink, "task query succeeded", data);
        Ok(())
    }
}
