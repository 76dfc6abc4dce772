use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use futures::StreamExt;
use modellink_contracts::{AggregatedResult, ResultMetadata};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::mapper::{collect_output_text, ensure_success};
use crate::{CoreError, HttpResponse};

const DONE_SENTINEL: &str = "[DONE]";
const DEFAULT_FAILURE_CODE: &str = "unknown_error";
const DEFAULT_FAILURE_MESSAGE: &str = "The model failed to generate a response.";

/// Picks the decoder from the `charset=` parameter of a content type.
/// Missing or unknown labels decode as UTF-8.
pub fn negotiate_charset(content_type: Option<&str>) -> &'static Encoding {
    let Some(content_type) = content_type else {
        return UTF_8;
    };
    content_type
        .split(';')
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .and_then(|(_, label)| Encoding::for_label(label.trim().trim_matches('"').as_bytes()))
        .unwrap_or(UTF_8)
}

/// Decodes one raw line. Bytes invalid in the negotiated charset fall back to
/// lossy UTF-8 for that line only.
pub fn decode_line(encoding: &'static Encoding, raw: &[u8]) -> String {
    let decoded = encoding
        .decode_without_bom_handling_and_without_replacement(raw)
        .unwrap_or_else(|| String::from_utf8_lossy(raw));
    decoded.trim_start_matches('\u{feff}').trim().to_string()
}

/// Splits a byte stream into lines on `\n`, `\r\n` or a bare `\r`, carrying
/// partial lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    pending_cr: bool,
}

impl LineFramer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\n' => lines.push(std::mem::take(&mut self.buffer)),
                b'\r' => {
                    lines.push(std::mem::take(&mut self.buffer));
                    self.pending_cr = true;
                }
                _ => self.buffer.push(byte),
            }
        }
        lines
    }

    /// Trailing bytes of a body that did not end with a line terminator.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.pending_cr = false;
        if self.buffer.is_empty() { None } else { Some(std::mem::take(&mut self.buffer)) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    Blank,
    Comment,
    Event,
    Data(&'a str),
    /// `id:`, `retry:` and anything unrecognized.
    Other,
}

pub fn classify_line(line: &str) -> SseLine<'_> {
    if line.is_empty() {
        SseLine::Blank
    } else if let Some(payload) = line.strip_prefix("data:") {
        SseLine::Data(payload.trim())
    } else if line.starts_with("event:") {
        SseLine::Event
    } else if line.starts_with(':') {
        SseLine::Comment
    } else {
        SseLine::Other
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataUpdate {
    pub model: Option<String>,
    pub id: Option<String>,
    pub created: Option<i64>,
    pub finish_reason: Option<String>,
    pub upstream_error: Option<Value>,
}

impl MetadataUpdate {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One unit of meaning extracted from a data line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Delta(String),
    Metadata(MetadataUpdate),
    Terminal { finish_reason: String, residual: Option<String> },
    Error { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    Done,
    Frames(Vec<StreamFrame>),
}

/// The two upstream dialects. Typed events are tried first since every one
/// carries a string `type`; anything else object-shaped is a chat chunk.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireEvent {
    Typed(TypedEvent),
    Chunk(ChatChunk),
}

#[derive(Debug, Deserialize)]
struct TypedEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    response: Option<ResponseSnapshot>,
    #[serde(default)]
    delta: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseSnapshot {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    model: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    output: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    model: Option<Value>,
    #[serde(default)]
    created: Option<Value>,
    #[serde(default)]
    choices: Option<Vec<ChunkChoice>>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    delta: Option<ChunkText>,
    #[serde(default)]
    message: Option<ChunkText>,
}

#[derive(Debug, Deserialize)]
struct ChunkText {
    #[serde(default)]
    content: Option<Value>,
}

pub fn decode_payload(payload: &str) -> Result<StreamPayload, CoreError> {
    if payload == DONE_SENTINEL {
        return Ok(StreamPayload::Done);
    }
    let event: WireEvent = serde_json::from_str(payload)
        .map_err(|err| CoreError::MalformedStreamFrame(err.to_string()))?;
    let frames = match event {
        WireEvent::Typed(event) => typed_frames(event),
        WireEvent::Chunk(chunk) => chunk_frames(chunk),
    };
    Ok(StreamPayload::Frames(frames))
}

fn typed_frames(event: TypedEvent) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    if let Some(response) = &event.response {
        let update = MetadataUpdate {
            model: scalar_text(response.model.as_ref()),
            id: scalar_text(response.id.as_ref()),
            created: timestamp(response.created_at.as_ref()),
            finish_reason: None,
            upstream_error: response.error.clone().filter(|error| !error.is_null()),
        };
        if !update.is_empty() {
            frames.push(StreamFrame::Metadata(update));
        }
    }

    let kind = event.kind.as_str();
    if is_lifecycle(&event, kind, "failed") {
        let error = event.response.as_ref().and_then(|response| response.error.as_ref());
        let field = |name: &str| error.and_then(|error| error.get(name)).and_then(Value::as_str);
        frames.push(StreamFrame::Error {
            code: field("code").unwrap_or(DEFAULT_FAILURE_CODE).to_string(),
            message: field("message").unwrap_or(DEFAULT_FAILURE_MESSAGE).to_string(),
        });
    } else if is_lifecycle(&event, kind, "completed") {
        let residual = event
            .response
            .as_ref()
            .and_then(|response| response.output.as_deref())
            .map(collect_output_text)
            .filter(|text| !text.is_empty());
        frames.push(StreamFrame::Terminal { finish_reason: "stop".to_string(), residual });
    } else if kind.contains("delta")
        && let Some(delta) = scalar_text(event.delta.as_ref())
    {
        frames.push(StreamFrame::Delta(delta));
    }
    frames
}

/// `response.<suffix>` always counts; other `*.<suffix>` events only when they
/// carry a response snapshot. Tool-call sub-events such as
/// `response.web_search_call.completed` carry none.
fn is_lifecycle(event: &TypedEvent, kind: &str, suffix: &str) -> bool {
    let Some(prefix) = kind.strip_suffix(suffix).and_then(|rest| rest.strip_suffix('.')) else {
        return false;
    };
    prefix == "response" || event.response.is_some()
}

fn chunk_frames(chunk: ChatChunk) -> Vec<StreamFrame> {
    let first = chunk.choices.and_then(|choices| choices.into_iter().next());
    let update = MetadataUpdate {
        model: scalar_text(chunk.model.as_ref()),
        id: scalar_text(chunk.id.as_ref()),
        created: timestamp(chunk.created.as_ref()),
        finish_reason: first.as_ref().and_then(|choice| choice.finish_reason.clone()),
        upstream_error: None,
    };

    let mut frames = Vec::new();
    if !update.is_empty() {
        frames.push(StreamFrame::Metadata(update));
    }
    if let Some(choice) = first {
        let piece = choice
            .delta
            .and_then(|delta| scalar_text(delta.content.as_ref()))
            .or_else(|| choice.message.and_then(|message| scalar_text(message.content.as_ref())));
        if let Some(piece) = piece {
            frames.push(StreamFrame::Delta(piece));
        }
    }
    frames
}

/// Non-empty text of a scalar field. Objects, arrays and nulls yield nothing.
fn scalar_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => Cow::Borrowed(text.as_str()),
        Value::Number(number) => Cow::Owned(number.to_string()),
        Value::Bool(flag) => Cow::Owned(flag.to_string()),
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text.into_owned()) }
}

fn timestamp(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value.as_i64().or_else(|| value.as_f64().map(|seconds| seconds as i64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    AwaitingLine,
    FrameDecoded,
    Accumulating,
    Terminal,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Stop,
}

/// Folds SSE lines into one [`AggregatedResult`]. Text only ever grows by
/// appending; metadata fields only change to another non-empty value.
#[derive(Debug)]
pub struct StreamAggregator {
    encoding: &'static Encoding,
    state: AggregatorState,
    content: String,
    metadata: ResultMetadata,
    upstream_error: Option<Value>,
    failure: Option<CoreError>,
    frames: usize,
    skipped: usize,
}

impl StreamAggregator {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            encoding,
            state: AggregatorState::AwaitingLine,
            content: String::new(),
            metadata: ResultMetadata::default(),
            upstream_error: None,
            failure: None,
            frames: 0,
            skipped: 0,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn upstream_error(&self) -> Option<&Value> {
        self.upstream_error.as_ref()
    }

    pub fn push_line(&mut self, raw: &[u8]) -> LineOutcome {
        if self.is_closed() {
            return LineOutcome::Stop;
        }
        let line = decode_line(self.encoding, raw);
        let SseLine::Data(payload) = classify_line(&line) else {
            return LineOutcome::Continue;
        };

        match decode_payload(payload) {
            Ok(StreamPayload::Done) => {
                self.state = AggregatorState::Terminal;
                LineOutcome::Stop
            }
            Ok(StreamPayload::Frames(frames)) => {
                self.state = AggregatorState::FrameDecoded;
                self.frames += 1;
                for frame in frames {
                    self.apply(frame);
                }
                if self.is_closed() { LineOutcome::Stop } else { LineOutcome::Continue }
            }
            Err(err) => {
                self.skipped += 1;
                warn!(
                    event = "stream.frame.malformed",
                    error = %err,
                    payload = %truncate(payload, 200)
                );
                LineOutcome::Continue
            }
        }
    }

    pub fn apply(&mut self, frame: StreamFrame) {
        if self.is_closed() {
            return;
        }
        match frame {
            StreamFrame::Delta(text) => {
                self.content.push_str(&text);
                debug!(event = "stream.delta", delta_len = text.len(), total_len = self.content.len());
            }
            StreamFrame::Metadata(update) => self.latch(update),
            StreamFrame::Terminal { finish_reason, residual } => {
                self.metadata.finish_reason = Some(finish_reason);
                if self.content.is_empty()
                    && let Some(residual) = residual
                {
                    debug!(event = "stream.residual_text", len = residual.len());
                    self.content = residual;
                }
            }
            StreamFrame::Error { code, message } => {
                warn!(event = "stream.failed", code = %code, message = %message);
                self.failure = Some(CoreError::UpstreamFailure { code, message });
                self.state = AggregatorState::Failed;
                return;
            }
        }
        self.state = AggregatorState::Accumulating;
    }

    pub fn finish(mut self) -> Result<AggregatedResult, CoreError> {
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }
        self.state = AggregatorState::Terminal;
        info!(
            event = "stream.completed",
            frames = self.frames,
            skipped = self.skipped,
            content_len = self.content.len(),
            finish_reason = ?self.metadata.finish_reason
        );
        Ok(AggregatedResult {
            content: self.content,
            role: "assistant".to_string(),
            finish_reason: self.metadata.finish_reason.clone(),
            usage: None,
            metadata: self.metadata,
        })
    }

    fn is_closed(&self) -> bool {
        matches!(self.state, AggregatorState::Terminal | AggregatorState::Failed)
    }

    fn latch(&mut self, update: MetadataUpdate) {
        latch(&mut self.metadata.model, update.model);
        latch(&mut self.metadata.id, update.id);
        if self.metadata.created.is_none() {
            self.metadata.created = update.created;
        }
        latch(&mut self.metadata.finish_reason, update.finish_reason);
        if let Some(error) = update.upstream_error {
            warn!(event = "stream.upstream_error", error = %error);
            self.upstream_error = Some(error);
        }
    }
}

fn latch(slot: &mut Option<String>, value: Option<String>) {
    if slot.is_none()
        && let Some(value) = value.filter(|value| !value.is_empty())
    {
        *slot = Some(value);
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Reads an SSE response body to completion and returns the aggregated chat
/// output. A non-2xx status fails before any line is read; `[DONE]` or a
/// failure event stops reading and drops the rest of the body.
pub async fn aggregate_response(response: HttpResponse) -> Result<AggregatedResult, CoreError> {
    let response = ensure_success(response).await?;
    let encoding = negotiate_charset(response.headers.get("content-type"));
    debug!(event = "stream.opened", charset = encoding.name());

    let mut framer = LineFramer::default();
    let mut aggregator = StreamAggregator::new(encoding);
    let mut body = response.body;

    'read: while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for line in framer.push(&chunk) {
            if aggregator.push_line(&line) == LineOutcome::Stop {
                break 'read;
            }
        }
    }
    if let Some(line) = framer.finish() {
        aggregator.push_line(&line);
    }

    aggregator.finish()
}
