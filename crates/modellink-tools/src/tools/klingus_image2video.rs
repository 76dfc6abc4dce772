use async_trait::async_trait;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::BodyFields;
use modellink_core::mapper::parse_json;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};
use serde_json::{Value, json};

use super::{descriptor, emit_success, success_body};

const IMAGE2VIDEO_PATH: &str = "/klingus/v1/videos/image2video";
const KLINGUS_BLANK_AS_ABSENT: &[&str] = &[
    "api_key",
    "model_name",
    "prompt",
    "negative_prompt",
    "image",
    "image_tail",
    "mode",
    "aspect_ratio",
    "duration",
    "callback_url",
    "external_task_id",
];
const KLINGUS_OPTIONAL_FIELDS: &[&str] = &[
    "prompt",
    "image",
    "image_tail",
    "negative_prompt",
    "cfg_scale",
    "aspect_ratio",
    "callback_url",
    "external_task_id",
];

/// Video from a start frame (`image`), an end frame (`image_tail`), or both.
pub struct KlingusImage2VideoTool;

fn build_image2video_body(params: &ToolParams) -> Result<BodyFields, CoreError> {
    if !params.contains("image") && !params.contains("image_tail") {
        return Err(CoreError::Validation(
            "missing required parameter: image or image_tail".to_string(),
        ));
    }
    let mut body = BodyFields::new()
        .required("model_name", params.str("model_name").unwrap_or("kling-v1"))
        .required("mode", params.str("mode").unwrap_or("std"))
        .required("duration", params.value("duration").cloned().unwrap_or_else(|| json!("5")))
        .required("enable_audio", params.value("enable_audio").cloned().unwrap_or(Value::Bool(true)));
    for field in KLINGUS_OPTIONAL_FIELDS {
        body.insert_opt(field, params.value(field).cloned());
    }
    Ok(body)
}

#[async_trait]
impl Tool for KlingusImage2VideoTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "klingus_image2video",
            "Submits an image-to-video task.",
            HttpMethod::Post,
            IMAGE2VIDEO_PATH,
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        KLINGUS_BLANK_AS_ABSENT
    }

    fn failure_message(&self) -> &'static str {
        "video generation task submission failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("api_key")?;
        let body = build_image2video_body(params)?;
        Ok(InvocationRequest::post_json(context.endpoint(IMAGE2VIDEO_PATH), body.into_json())
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
        emit_success(sink, "video generation task submitted", data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use modellink_contracts::{Headers, RequestBody};
    use modellink_core::CollectingSink;

    use super::*;
    use crate::tools::testing::{context, params};

    fn klingus_params(value: Value) -> ToolParams {
        params(value, KLINGUS_BLANK_AS_ABSENT)
    }

    #[tokio::test]
    async fn defaults_and_optionals() {
        let params = klingus_params(json!({
            "api_key": "k-1",
            "image": "https://cdn.example.com/start.png",
            "image_tail": "",
            "cfg_scale": 0.5,
            "negative_prompt": "variable",
            "callback_url": "https://hooks.example.com/done"
        }));
        let request =
            KlingusImage2VideoTool.build_request(&params, &context()).await.expect("request builds");
        assert_eq!(request.url, "https://api.modellink.online/klingus/v1/videos/image2video");
        assert_eq!(
            request.body,
            RequestBody::Json(json!({
                "model_name": "kling-v1",
                "mode": "std",
                "duration": "5",
                "enable_audio": true,
                "image": "https://cdn.example.com/start.png",
                "cfg_scale": 0.5,
                "callback_url": "https://hooks.example.com/done"
            }))
        );
    }

    #[tokio::test]
    async fn a_frame_is_required() {
        let params = klingus_params(json!({"api_key": "k-1", "prompt": "waves", "image": ""}));
        let err = KlingusImage2VideoTool
            .build_request(&params, &context())
            .await
            .expect_err("no frame");
        assert_eq!(
            err,
            CoreError::Validation("missing required parameter: image or image_tail".to_string())
        );
    }

    #[test]
    fn end_frame_alone_is_enough() {
        let params = klingus_params(json!({"api_key": "k-1", "image_tail": "aGVsbG8=", "enable_audio": false}));
        let body = build_image2video_body(&params).expect("body builds").into_json();
        assert_eq!(body["image_tail"], json!("aGVsbG8="));
        assert_eq!(body["enable_audio"], json!(false));
        assert!(body.get("image").is_none());
    }

    #[tokio::test]
    async fn data_member_is_passed_through() {
        let body = json!({"code": 0, "data": {"task_id": "t-9", "task_status": "submitted"}}).to_string();
        let mut sink = CollectingSink::default();
        KlingusImage2VideoTool
            .map_response(&ToolParams::default(), HttpResponse::from_body(200, Headers::new(), body), &mut sink)
            .await
            .expect("maps");
        let envelope = sink.messages()[0].as_envelope().expect("json message");
        assert_eq!(envelope.data, Some(json!({"task_id": "t-9", "task_status": "submitted"})));

        let mut sink = CollectingSink::default();
        KlingusImage2VideoTool
            .map_response(&ToolParams::default(), HttpResponse::from_body(200, Headers::new(), "{}"), &mut sink)
            .await
            .expect("maps");
        assert_eq!(sink.messages()[0].as_envelope().and_then(|e| e.data.clone()), Some(json!({})));
    }
}
