use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use modellink_contracts::{HttpMethod, InvocationRequest, ToolDescriptor};
use modellink_core::builder::path_segment;
use modellink_core::content::sanitize_url;
use modellink_core::mapper::{emit_inline_images, ensure_success, extract_inline_images};
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool, ToolContext, ToolParams};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{descriptor, success_body};

const GENERATE_PATH_TEMPLATE: &str = "/v1beta/models/{model}:generateContent";
const BANANA_BLANK_AS_ABSENT: &[&str] =
    &["api_key", "model", "prompt", "reference_image_url", "ratio", "size"];
const MAX_REFERENCE_IMAGES: usize = 14;
const REFERENCE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REFERENCE_MIME: &str = "image/png";
/// Only this model accepts an explicit output size.
const SIZED_MODEL: &str = "gemini-3-pro-image-preview";
const ARTIFACT_PREFIX: &str = "banana_gen";

/// Gemini-style image generation; each returned image becomes a blob.
pub struct BananaGenTool;

fn generate_path(model: &str) -> String {
    GENERATE_PATH_TEMPLATE.replace("{model}", &path_segment(model))
}

fn reference_urls(params: &ToolParams) -> Vec<String> {
    let urls: Vec<String> = match params.value("reference_image_url") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(url)) => vec![url.trim().to_string()],
        _ => Vec::new(),
    };
    if urls.len() > MAX_REFERENCE_IMAGES {
        warn!(
            event = "request.reference_images.truncated",
            supplied = urls.len(),
            limit = MAX_REFERENCE_IMAGES
        );
    }
    urls.into_iter().take(MAX_REFERENCE_IMAGES).collect()
}

/// Fetches one reference image and wraps it as an inline part.
async fn download_reference(context: &ToolContext, raw_url: &str) -> Result<Value, CoreError> {
    let url = sanitize_url(raw_url)?;
    let request = InvocationRequest::get(url).timeout(REFERENCE_DOWNLOAD_TIMEOUT);
    let response = ensure_success(context.transport.send(request).await?).await?;
    let mime_type = response
        .content_type()
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_REFERENCE_MIME)
        .to_string();
    let bytes = response.bytes().await?;
    debug!(event = "request.reference_image.downloaded", size = bytes.len(), mime_type = %mime_type);
    Ok(json!({ "inlineData": { "mimeType": mime_type, "data": STANDARD.encode(bytes) } }))
}

fn generation_config(params: &ToolParams, model: &str) -> Value {
    let mut image_config = serde_json::Map::new();
    if let Some(ratio) = params.str("ratio") {
        image_config.insert("aspectRatio".to_string(), Value::from(ratio));
    }
    if model == SIZED_MODEL
        && let Some(size) = params.str("size")
    {
        image_config.insert("imageSize".to_string(), Value::from(size));
    }
    let mut config = json!({ "responseModalities": ["IMAGE"] });
    if !image_config.is_empty() {
        config["imageConfig"] = Value::Object(image_config);
    }
    config
}

#[async_trait]
impl Tool for BananaGenTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "banana_gen",
            "Image generation; returns each generated image as a binary artifact.",
            HttpMethod::Post,
            GENERATE_PATH_TEMPLATE,
            false,
        )
    }

    fn blank_as_absent(&self) -> &'static [&'static str] {
        BANANA_BLANK_AS_ABSENT
    }

    fn failure_message(&self) -> &'static str {
        "image generation failed"
    }

    async fn build_request(
        &self,
        params: &ToolParams,
        context: &ToolContext,
    ) -> Result<InvocationRequest, CoreError> {
        let api_key = params.required("api_key")?;
        let model = params.required("model")?;

        let mut parts = Vec::new();
        if let Some(prompt) = params.str("prompt") {
            parts.push(json!({ "text": prompt }));
        }
        for url in reference_urls(params) {
            match download_reference(context, &url).await {
                Ok(part) => parts.push(part),
                Err(err) => {
                    warn!(event = "request.reference_image.skipped", url = %url, error = %err);
                }
            }
        }

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": generation_config(params, &model),
        });
        Ok(InvocationRequest::post_json(context.endpoint(&generate_path(&model)), body)
            .header("x-goog-api-key", api_key))
    }

    async fn map_response(
        &self,
        _params: &ToolParams,
        response: HttpResponse,
        sink: &mut dyn ResultSink,
    ) -> Result<(), CoreError> {
        let body = success_body(response).await?;
        let images = extract_inline_images(&body)?;
        emit_inline_images(ARTIFACT_PREFIX, images, sink)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use modellink_contracts::{Headers, RequestBody, ToolMessage};
    use modellink_core::CollectingSink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::tools::testing::{context, context_at, params};

    fn banana_params(value: Value) -> ToolParams {
        params(value, BANANA_BLANK_AS_ABSENT)
    }

    fn json_body(request: &InvocationRequest) -> Value {
        match &request.body {
            RequestBody::Json(body) => body.clone(),
            other => panic!("expected a JSON body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_carries_key_header_and_image_config() {
        let params = banana_params(json!({
            "api_key": "g-key",
            "model": "gemini-3-pro-image-preview",
            "prompt": "a banana in space",
            "ratio": "16:9",
            "size": "2K"
        }));
        let request = BananaGenTool.build_request(&params, &context()).await.expect("request builds");

        assert_eq!(
            request.url,
            "https://api.modellink.online/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
        assert_eq!(request.headers.get("x-goog-api-key"), Some("g-key"));
        assert_eq!(request.headers.get("authorization"), None);
        assert_eq!(
            json_body(&request),
            json!({
                "contents": [{"parts": [{"text": "a banana in space"}]}],
                "generationConfig": {
                    "responseModalities": ["IMAGE"],
                    "imageConfig": {"aspectRatio": "16:9", "imageSize": "2K"}
                }
            })
        );
    }

    #[tokio::test]
    async fn size_is_dropped_for_other_models() {
        let params = banana_params(json!({
            "api_key": "g-key",
            "model": "gemini-2.5-flash-image",
            "prompt": "x",
            "size": "2K"
        }));
        let request = BananaGenTool.build_request(&params, &context()).await.expect("request builds");
        assert_eq!(json_body(&request)["generationConfig"], json!({"responseModalities": ["IMAGE"]}));
    }

    #[tokio::test]
    async fn model_is_encoded_into_the_path() {
        let params = banana_params(json!({"api_key": "g-key", "model": "tuned/v1 image", "prompt": "x"}));
        let request = BananaGenTool.build_request(&params, &context()).await.expect("request builds");
        assert_eq!(
            request.url,
            "https://api.modellink.online/v1beta/models/tuned%2Fv1%20image:generateContent"
        );
    }

    #[tokio::test]
    async fn model_is_required() {
        let params = banana_params(json!({"api_key": "g-key", "model": "", "prompt": "x"}));
        let err = BananaGenTool.build_request(&params, &context()).await.expect_err("no model");
        assert_eq!(err, CoreError::Validation("missing required parameter: model".to_string()));
    }

    #[tokio::test]
    async fn reference_images_are_inlined_and_failures_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ref/cat.jpg"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"JPEGDATA".to_vec(), "image/jpeg; q=0.9"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ref/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let params = banana_params(json!({
            "api_key": "g-key",
            "model": "gemini-2.5-flash-image",
            "reference_image_url": [
                format!("`{}/ref/cat.jpg`", server.uri()),
                format!("{}/ref/missing.png", server.uri()),
                "not a url"
            ]
        }));
        let request = BananaGenTool
            .build_request(&params, &context_at(&server.uri()))
            .await
            .expect("skipped references do not fail the request");

        assert_eq!(
            json_body(&request)["contents"][0]["parts"],
            json!([{"inlineData": {"mimeType": "image/jpeg", "data": STANDARD.encode(b"JPEGDATA")}}])
        );
    }

    #[tokio::test]
    async fn each_inline_image_becomes_a_blob() {
        let body = json!({"candidates": [{"content": {"parts": [
            {"text": "here you go"},
            {"inlineData": {"mimeType": "image/jpeg", "data": STANDARD.encode(b"one")}},
            {"inline_data": {"data": STANDARD.encode(b"two")}}
        ]}}]})
        .to_string();
        let response = HttpResponse::from_body(200, Headers::new(), body);
        let mut sink = CollectingSink::default();
        BananaGenTool
            .map_response(&ToolParams::default(), response, &mut sink)
            .await
            .expect("images map");

        let blobs: Vec<_> = sink.messages().iter().filter_map(ToolMessage::as_blob).collect();
        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].bytes, b"one");
        assert_eq!(blobs[0].mime_type, "image/jpeg");
        assert!(blobs[0].file_name.starts_with("banana_gen_"));
        assert!(blobs[0].file_name.ends_with(".jpg"));
        assert_eq!(blobs[1].mime_type, "image/png");
        assert!(blobs[1].file_name.ends_with(".png"));
    }

    #[tokio::test]
    async fn response_without_images_is_missing_content() {
        let body = json!({"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}).to_string();
        let response = HttpResponse::from_body(200, Headers::new(), body);
        let mut sink = CollectingSink::default();
        let err = BananaGenTool
            .map_response(&ToolParams::default(), response, &mut sink)
            .await
            .expect_err("no images");
        assert_eq!(err.kind(), "MissingContent");
        assert!(sink.messages().is_empty());
    }
}
