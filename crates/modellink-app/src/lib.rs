use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use modellink_contracts::{
    BlobMeta, HttpMethod, InvokeToolRequest, InvokeToolResponse, NormalizedEnvelope, ToolDescriptor,
    ToolMessage, ToolMessageView,
};
use modellink_core::{CoreError, HttpTransport, ToolEngine};
use modellink_tools::{HttpRuntime, ToolRegistry};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod config;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct ToolListResponse {
    tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
struct ErrorResponse {
    error: String,
}

#[derive(OpenApi)]
#[openapi(
    paths(get_health, get_tools, post_invoke_tool),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            ToolListResponse,
            ToolDescriptor,
            HttpMethod,
            InvokeToolRequest,
            InvokeToolResponse,
            ToolMessageView,
            NormalizedEnvelope,
            BlobMeta
        )
    ),
    tags(
        (name = "modellink-app", description = "modellink tool host API")
    )
)]
struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    engine: ToolEngine,
    registry: Arc<ToolRegistry>,
}

impl AppState {
    pub fn from_config(config: &config::AppConfig) -> Result<Self, CoreError> {
        let runtime = HttpRuntime::with_connect_timeout(config.connect_timeout())?;
        Ok(Self::new(Arc::new(runtime), config.upstream_base_url.clone()))
    }

    pub fn new(transport: Arc<dyn HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            engine: ToolEngine::new(transport, base_url),
            registry: Arc::new(ToolRegistry::builtin()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/api/v1/tools", get(get_tools))
        .route("/api/v1/tools/{name}/invoke", post(post_invoke_tool))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service health", body = HealthResponse)),
    tag = "modellink-app"
)]
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy".to_string() })
}

#[utoipa::path(
    get,
    path = "/api/v1/tools",
    responses((status = 200, description = "Registered tools", body = ToolListResponse)),
    tag = "modellink-app"
)]
async fn get_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse { tools: state.registry.descriptors() })
}

/// Tool failures are still `200`: they arrive as failure envelopes in
/// `messages`. Only an unknown tool name is an HTTP error.
#[utoipa::path(
    post,
    path = "/api/v1/tools/{name}/invoke",
    params(("name" = String, Path, description = "Tool name")),
    request_body = InvokeToolRequest,
    responses(
        (status = 200, description = "Messages emitted by the tool", body = InvokeToolResponse),
        (status = 404, description = "Unknown tool", body = ErrorResponse)
    ),
    tag = "modellink-app"
)]
#[instrument(skip(state, request))]
async fn post_invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<InvokeToolRequest>,
) -> Response {
    let Some(tool) = state.registry.get(&name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { error: format!("unknown tool: {name}") }),
        )
            .into_response();
    };

    let messages = state.engine.invoke_collect(tool.as_ref(), request.parameters).await;
    info!(event = "app.tool.invoked", messages = messages.len());
    Json(InvokeToolResponse { messages: messages.into_iter().map(message_view).collect() })
        .into_response()
}

fn message_view(message: ToolMessage) -> ToolMessageView {
    match message {
        ToolMessage::Json(json) => ToolMessageView::Json { json },
        ToolMessage::Blob(artifact) => {
            ToolMessageView::Blob { meta: artifact.meta(), data: STANDARD.encode(&artifact.bytes) }
        }
    }
}
