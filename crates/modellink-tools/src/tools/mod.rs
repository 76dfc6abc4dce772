use std::collections::BTreeMap;
use std::sync::Arc;

use modellink_contracts::{HttpMethod, NormalizedEnvelope, ToolDescriptor};
use modellink_core::mapper::ensure_success;
use modellink_core::{CoreError, HttpResponse, ResultSink, Tool};
use serde_json::Value;

pub(crate) mod banana_gen;
pub(crate) mod klingus_image2video;
pub(crate) mod klingus_text2video_query;
pub(crate) mod openai_chat;
pub(crate) mod openai_completions;
pub(crate) mod openai_responses;
pub(crate) mod sora_video;
pub(crate) mod sora_video_query;
pub(crate) mod suno_fetch_music;
pub(crate) mod suno_submit_music;

pub use banana_gen::BananaGenTool;
pub use klingus_image2video::KlingusImage2VideoTool;
pub use klingus_text2video_query::KlingusText2VideoQueryTool;
pub use openai_chat::OpenAiChatTool;
pub use openai_completions::OpenAiCompletionsTool;
pub use openai_responses::OpenAiResponsesTool;
pub use sora_video::{SORA_CONSTRAINTS, SoraVideoTool};
pub use sora_video_query::SoraVideoQueryTool;
pub use suno_fetch_music::SunoFetchMusicTool;
pub use suno_submit_music::SunoSubmitMusicTool;

/// Tools by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn builtin() -> Self {
        let tools: [Arc<dyn Tool>; 10] = [
            Arc::new(OpenAiChatTool),
            Arc::new(OpenAiCompletionsTool),
            Arc::new(OpenAiResponsesTool),
            Arc::new(BananaGenTool),
            Arc::new(SoraVideoTool),
            Arc::new(SoraVideoQueryTool),
            Arc::new(KlingusImage2VideoTool),
            Arc::new(KlingusText2VideoQueryTool),
            Arc::new(SunoSubmitMusicTool),
            Arc::new(SunoFetchMusicTool),
        ];
        let mut registry = Self::default();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.descriptor().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|tool| tool.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub(crate) fn descriptor(
    name: &str,
    description: &str,
    method: HttpMethod,
    path: &str,
    streaming: bool,
) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        method,
        path: path.to_string(),
        streaming,
    }
}

/// Body text of a 2xx response.
pub(crate) async fn success_body(response: HttpResponse) -> Result<String, CoreError> {
    ensure_success(response).await?.text().await
}

/// Emits `data` under `message` as the single success envelope.
pub(crate) fn emit_success(sink: &mut dyn ResultSink, message: &str, data: Value) {
    sink.emit_envelope(NormalizedEnvelope::success(message, data));
}
