use serde_json::{Map, Value, json};
use url::Url;

use crate::CoreError;
use crate::params::is_truthy;

/// Chat-completions content. Strings and part lists pass through; a single
/// object becomes a one-element text part list when it carries text.
pub fn normalize_chat_content(content: &Value) -> Value {
    match content {
        Value::String(_) | Value::Array(_) => content.clone(),
        Value::Object(map) => match object_text(map) {
            Some(text) => json!([{ "type": "text", "text": text }]),
            None => Value::String(content.to_string()),
        },
        other => Value::String(render(other)),
    }
}

/// Responses-API content: every part ends up as a typed `input_*` item.
pub fn normalize_responses_content(content: &Value) -> Result<Value, CoreError> {
    match content {
        Value::String(_) => Ok(content.clone()),
        Value::Object(map) => match object_text(map) {
            Some(text) => Ok(json!([{ "type": "input_text", "text": render(text) }])),
            None => Ok(Value::Array(vec![normalize_content_item(map)?])),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => normalize_content_item(map),
                other => Ok(json!({ "type": "input_text", "text": render(other) })),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(Value::String(render(other))),
    }
}

pub fn normalize_content_item(item: &Map<String, Value>) -> Result<Value, CoreError> {
    match item.get("type").and_then(Value::as_str) {
        Some("input_text") => {
            let text = item.get("text").map(render).unwrap_or_default();
            Ok(json!({ "type": "input_text", "text": text }))
        }
        Some("input_image") => {
            let raw = item.get("image_url").map(render).unwrap_or_default();
            Ok(json!({ "type": "input_image", "image_url": sanitize_url(&raw)? }))
        }
        Some("input_file") => {
            let mut file = Map::new();
            file.insert("type".to_string(), Value::String("input_file".to_string()));
            if let Some(url) = item.get("file_url").filter(|value| is_truthy(value)) {
                file.insert("file_url".to_string(), Value::String(sanitize_url(&render(url))?));
            } else if let Some(id) = item.get("file_id").filter(|value| is_truthy(value)) {
                file.insert("file_id".to_string(), Value::String(render(id)));
            }
            Ok(Value::Object(file))
        }
        _ => Ok(Value::Object(item.clone())),
    }
}

/// Cleans up URLs pasted through templating layers and insists on an
/// absolute http(s) URL with a host.
pub fn sanitize_url(raw: &str) -> Result<String, CoreError> {
    let mut cleaned = raw.trim();
    if cleaned.len() >= 2 && cleaned.starts_with('`') && cleaned.ends_with('`') {
        cleaned = cleaned[1..cleaned.len() - 1].trim();
    }
    let cleaned = cleaned.strip_suffix('\\').unwrap_or(cleaned);

    let parsed = Url::parse(cleaned).map_err(|_| CoreError::InvalidUrl(cleaned.to_string()))?;
    let has_host = parsed.host_str().is_some_and(|host| !host.is_empty());
    if !matches!(parsed.scheme(), "http" | "https") || !has_host {
        return Err(CoreError::InvalidUrl(cleaned.to_string()));
    }
    Ok(cleaned.to_string())
}

pub fn build_chat_messages(
    messages: Option<&Value>,
    prompt: Option<&str>,
) -> Result<Vec<Value>, CoreError> {
    let listed = messages.and_then(Value::as_array).filter(|items| !items.is_empty());
    if let Some(items) = listed {
        return Ok(items
            .iter()
            .filter_map(|message| {
                let content = message.get("content").filter(|value| is_truthy(value))?;
                Some(json!({
                    "role": message_role(message),
                    "content": normalize_chat_content(content)
                }))
            })
            .collect());
    }
    match prompt {
        Some(prompt) => Ok(vec![json!({ "role": "user", "content": prompt })]),
        None => Err(CoreError::Validation(
            "missing required parameter: messages or prompt".to_string(),
        )),
    }
}

pub fn build_responses_input(
    messages: Option<&Value>,
    prompt: Option<&str>,
) -> Result<Value, CoreError> {
    let items = messages.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
    if let Some(prompt) = prompt.filter(|text| !text.is_empty())
        && items.is_empty()
    {
        return Ok(Value::String(prompt.to_string()));
    }

    let mut input = Vec::new();
    for message in items {
        let Some(content) = message.get("content").filter(|value| is_truthy(value)) else {
            continue;
        };
        input.push(json!({
            "role": message_role(message),
            "content": normalize_responses_content(content)?
        }));
    }

    if input.is_empty() {
        return Ok(Value::String(prompt.unwrap_or_default().to_string()));
    }
    Ok(Value::Array(input))
}

fn message_role(message: &Value) -> &str {
    message.get("role").and_then(Value::as_str).unwrap_or("user")
}

fn object_text(map: &Map<String, Value>) -> Option<&Value> {
    map.get("text").filter(|value| is_truthy(value)).or_else(|| {
        map.get("content").filter(|value| is_truthy(value))
    })
}

pub(crate) fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_content_dispatches_on_shape() {
        assert_eq!(normalize_chat_content(&json!("hi")), json!("hi"));
        assert_eq!(
            normalize_chat_content(&json!([{"type": "image_url", "image_url": {"url": "u"}}])),
            json!([{"type": "image_url", "image_url": {"url": "u"}}])
        );
        assert_eq!(
            normalize_chat_content(&json!({"type": "text", "content": "hello"})),
            json!([{"type": "text", "text": "hello"}])
        );
        assert_eq!(normalize_chat_content(&json!({"foo": 1})), json!("{\"foo\":1}"));
        assert_eq!(normalize_chat_content(&json!(12)), json!("12"));
    }

    #[test]
    fn responses_content_types_every_part() {
        let content = json!([
            "plain",
            {"type": "input_text", "text": "describe"},
            {"type": "input_image", "image_url": " `https://cdn.example.com/cat.png` "},
            {"type": "input_file", "file_id": "file-1"}
        ]);
        let normalized = normalize_responses_content(&content).expect("content is valid");
        assert_eq!(
            normalized,
            json!([
                {"type": "input_text", "text": "plain"},
                {"type": "input_text", "text": "describe"},
                {"type": "input_image", "image_url": "https://cdn.example.com/cat.png"},
                {"type": "input_file", "file_id": "file-1"}
            ])
        );
    }

    #[test]
    fn responses_object_with_text_wraps_as_input_text() {
        let normalized =
            normalize_responses_content(&json!({"text": "hello"})).expect("content is valid");
        assert_eq!(normalized, json!([{"type": "input_text", "text": "hello"}]));
    }

    #[test]
    fn sanitize_url_strips_wrapping_and_trailing_backslash() {
        assert_eq!(
            sanitize_url("  https://example.com/a.png\\").as_deref(),
            Ok("https://example.com/a.png")
        );
        assert_eq!(sanitize_url("`http://example.com`").as_deref(), Ok("http://example.com"));
    }

    #[test]
    fn sanitize_url_rejects_non_http_and_relative() {
        assert!(matches!(sanitize_url("ftp://example.com/x"), Err(CoreError::InvalidUrl(_))));
        assert!(matches!(sanitize_url("/relative/path"), Err(CoreError::InvalidUrl(_))));
        assert!(matches!(sanitize_url("None"), Err(CoreError::InvalidUrl(_))));
    }

    #[test]
    fn invalid_image_url_fails_the_whole_input() {
        let messages = json!([{"role": "user", "content": [{"type": "input_image", "image_url": "nope"}]}]);
        let err = build_responses_input(Some(&messages), None).expect_err("url is invalid");
        assert!(matches!(err, CoreError::InvalidUrl(_)));
    }

    #[test]
    fn chat_messages_fall_back_to_prompt() {
        let messages = build_chat_messages(Some(&json!([])), Some("hello")).expect("prompt given");
        assert_eq!(messages, vec![json!({"role": "user", "content": "hello"})]);
    }

    #[test]
    fn chat_messages_skip_empty_content_and_default_role() {
        let messages = json!([{"content": "hello"}, {"role": "assistant", "content": ""}]);
        let built = build_chat_messages(Some(&messages), None).expect("messages given");
        assert_eq!(built, vec![json!({"role": "user", "content": "hello"})]);
    }

    #[test]
    fn chat_messages_require_messages_or_prompt() {
        let err = build_chat_messages(None, None).expect_err("nothing to send");
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn responses_input_prefers_plain_prompt_without_messages() {
        assert_eq!(build_responses_input(None, Some("tell me")).ok(), Some(json!("tell me")));
        assert_eq!(build_responses_input(None, None).ok(), Some(json!("")));
    }
}
