use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::{BodyFields, ModelConstraint, constrain};
use modellink_core::mapper::parse_json;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};
use serde_json::{Value, json};

use super::{descriptor, emit_success, success_body};

pub(crate) const SORA_PATH: &str = "/v1/videos";
const DEFAULT_SORA_MODEL: &str = "sora-2";
const DEFAULT_SORA_SECONDS: &str = "10";
const SORA_BLANK_AS_ABSENT: &[&str] = &[
    "apiKey",
    "model",
    "prompt",
    "seconds",
    "input_reference",
    "size",
    "character_url",
    "character_timestamps",
];
const SORA_OPTIONAL_FIELDS: &[&str] =
    &["input_reference", "watermark", "private", "character_url", "character_timestamps"];

/// Value sets the upstream enforces per model; anything else is coerced.
pub const SORA_CONSTRAINTS: &[ModelConstraint] = &[
    ModelConstraint {
        model: "sora-2",
        param: "size",
        allowed: &["720x1280", "1280x720"],
        fallback: "1280x720",
    },
    ModelConstraint {
        model: "sora-2",
        param: "seconds",
        allowed: &["10", "15"],
        fallback: "10",
    },
];

/// Submits a video generation task as `multipart/form-data`.
pub struct SoraVideoTool;

fn build_sora_form(params: &ToolParams) -> Result<BodyFields, CoreError> {
    let prompt = params.required("prompt")?;
    let model = params.str("model").unwrap_or(DEFAULT_SORA_MODEL).to_string();
    let seconds = params.value("seconds").cloned().unwrap_or_else(|| json!(DEFAULT_SORA_SECONDS));

    let mut form = BodyFields::new()
        .required("model", model.as_str())
        .required("prompt", prompt)
        .required("seconds", constrain(SORA_CONSTRAINTS, &model, "seconds", seconds));
    if let Some(size) = params.value("size").cloned() {
        form.insert("size", constrain(SORA_CONSTRAINTS, &model, "size", size));
    }
    for field in SORA_OPTIONAL_FIELDS {
        form.insert_opt(field, params.value(field).cloned());
    }
    Ok(form)
}

#[async_trait]
impl Tool for SoraVideoTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "sora_video",
            "Submits a video generation task; returns the task id for polling.",
            HttpMethod::Post,
            SORA_PATH,
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        SORA_BLANK_AS_ABSENT
    }

    fn failure_message(&self) -> &'static str {
        "video generation failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("apiKey")?;
        let form = build_sora_form(params)?;
        Ok(InvocationRequest::post_multipart(context.endpoint(SORA_PATH), form.into_multipart())
            .bearer_auth(&api_key))
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let body: Value = parse_json(&success_body(response).await?)?;
        let field = |name: &str| body.get(name).cloned().unwrap_or(Value::Null);
        let data = json!({
            "task_id": field("id"),
            "model": field("model"),
            "status": field("status"),
            "created": field("created"),
            "expires_at": field("expires_at"),
            "task_type": field("task_type"),
        });
        emit_success(sink, "video generation task submitted", data);
        Ok(())
    }
}
