use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::path_segment;
use modellink_core::mapper::parse_json;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};
use serde_json::{Map, Value};

use super::sora_video::SORA_PATH;
use super::{descriptor, emit_success, success_body};

const STATUS_FIELDS: &[&str] = &[
    "id",
    "model",
    "status",
    "progress",
    "seconds",
    "size",
    "created_at",
    "completed_at",
    "url",
    "video_url",
    "result_url",
];

pub struct SoraVideoQueryTool;

#[async_trait]
impl Tool for SoraVideoQueryTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "sora_video_query",
            "Polls a submitted video task.",
            HttpMethod::Get,
            "/v1/videos/{id}",
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        &["apiKey", "id"]
    }

    fn failure_message(&self) -> &'static str {
        "video query failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("apiKey")?;
        let id = params.required("id")?;
        let url = context.endpoint(&format!("{SORA_PATH}/{}", path_segment(&id)));
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
        // Fields the upstream omits are reported as null so callers see a stable shape.
        let data: Map<String, Value> = STATUS_FIELDS
            .iter()
            .map(|name| (name.to_string(), body.get(*name).cloned().unwrap_or(Value::Null)))
            .collect();
        emit_success(sink, "video query succeeded", Value::Object(data));
        Ok(())
    }
}
