//! HTTP surface: the streaming chat endpoint plus the management routes the
//! desktop shell calls.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{FromRequest, Path, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ApiError;
use crate::llm::{LlmSettings, Orchestrator};
use crate::mcp::config::import_descriptor;
use crate::mcp::{ConnectionRegistry, ConnectionStatus, ServerConfig};
use crate::normalized::marker_stream;
use crate::session::{ChatMessage, ChatSession};
use crate::settings::{GeneralSettings, GeneralSettingsPatch, SettingsStore};

/// Returned by `/api/chat` when the provider is not set up yet.
pub const NOT_CONFIGURED_MESSAGE: &str =
    "API Key or Base URL not configured. Please go to Settings.";

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Owner of every MCP transport.
    pub registry: Arc<ConnectionRegistry>,
    /// Read on every request; nothing here is cached.
    pub settings: Arc<dyn SettingsStore>,
    /// Shared upstream HTTP client.
    pub http: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(registry: Arc<ConnectionRegistry>, settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            registry,
            settings,
            http: reqwest::Client::new(),
        }
    }
}

/// `Json` extractor whose rejections render as `{ "error": … }` like every
/// other failure on this surface.
#[derive(Debug)]
struct ApiJson<T>(T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = axum::extract::rejection::JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(api_health))
        .route("/api/chat", post(api_chat))
        .route("/api/mcp/status", get(api_mcp_status))
        .route("/api/mcp/refresh", post(api_mcp_refresh))
        .route("/api/mcp/servers", get(api_get_servers).put(api_put_servers))
        .route("/api/mcp/import", post(api_mcp_import))
        .route("/api/settings", get(api_get_settings).put(api_put_settings))
        .route(
            "/api/sessions",
            get(api_list_sessions).post(api_create_session),
        )
        .route(
            "/api/sessions/{id}",
            put(api_update_session).delete(api_delete_session),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router(state)` on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!(
        name: "server.started",
        address = %addr,
        port = addr.port(),
        "Server started"
    );

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    model: Option<String>,
    /// Conversation id; only used for logging.
    #[serde(default)]
    id: Option<String>,
}

/// POST /api/chat - Stream one assistant turn as marked-up text.
async fn api_chat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Response, ApiError> {
    let provider = state.settings.provider_settings().await?;
    if !provider.is_configured() {
        return Err(ApiError::BadRequest(NOT_CONFIGURED_MESSAGE.to_string()));
    }

    let model = provider.resolve_model(req.model.as_deref());
    let messages: Vec<_> = req
        .messages
        .iter()
        .filter_map(ChatMessage::to_llm_message)
        .collect();

    let tools = state.registry.build_tool_set().await;

    tracing::info!(
        conversation = ?req.id,
        model = %model,
        message_count = messages.len(),
        tool_count = tools.len(),
        "Received chat request"
    );

    let settings = LlmSettings {
        base_url: provider.base_url,
        api_key: Some(provider.api_key),
        model,
    };
    let orchestrator = Orchestrator::new(settings, tools, state.http.clone());
    let events = orchestrator
        .chat_with_history(messages)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(marker_stream(events)),
    )
        .into_response())
}

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// MCP management
// ─────────────────────────────────────────────────────────────────────────────

async fn api_mcp_status(State(state): State<AppState>) -> Json<Vec<ConnectionStatus>> {
    Json(state.registry.list_status().await)
}

/// POST /api/mcp/refresh - Reconcile connections with the stored server list.
async fn api_mcp_refresh(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConnectionStatus>>, ApiError> {
    let servers = state.settings.mcp_servers().await?;
    state.registry.reconcile(&servers).await;
    Ok(Json(state.registry.list_status().await))
}

async fn api_get_servers(
    State(state): State<AppState>,
) -> Result<Json<Vec<ServerConfig>>, ApiError> {
    Ok(Json(state.settings.mcp_servers().await?))
}

/// PUT /api/mcp/servers - Replace the server list and reconcile.
async fn api_put_servers(
    State(state): State<AppState>,
    ApiJson(servers): ApiJson<Vec<ServerConfig>>,
) -> Result<StatusCode, ApiError> {
    state.settings.save_mcp_servers(servers).await?;
    let stored = state.settings.mcp_servers().await?;
    state.registry.reconcile(&stored).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    path: String,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ImportResponse {
    Imported { success: bool, count: usize },
    Failed { success: bool, error: String },
}

/// POST /api/mcp/import - Load a `{ "mcpServers": … }` descriptor.
async fn api_mcp_import(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ImportRequest>,
) -> Json<ImportResponse> {
    match import_descriptor(state.settings.as_ref(), &req.path).await {
        Ok(count) => {
            match state.settings.mcp_servers().await {
                Ok(servers) => state.registry.reconcile(&servers).await,
                Err(e) => tracing::error!(error = %e, "Failed to reload servers after import"),
            }
            Json(ImportResponse::Imported {
                success: true,
                count,
            })
        }
        Err(e) => {
            tracing::warn!(path = %req.path, error = %e, "MCP config import failed");
            Json(ImportResponse::Failed {
                success: false,
                error: e.to_string(),
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings & sessions
// ─────────────────────────────────────────────────────────────────────────────

async fn api_get_settings(
    State(state): State<AppState>,
) -> Result<Json<GeneralSettings>, ApiError> {
    Ok(Json(state.settings.general_settings().await?))
}

async fn api_put_settings(
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<GeneralSettingsPatch>,
) -> Result<Json<GeneralSettings>, ApiError> {
    state.settings.save_general_settings(patch).await?;
    Ok(Json(state.settings.general_settings().await?))
}

async fn api_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatSession>>, ApiError> {
    Ok(Json(state.settings.sessions().await?))
}

/// POST /api/sessions - Create an empty session, newest first.
async fn api_create_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    let session = ChatSession::new();
    state.settings.create_session(session.clone()).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[derive(Debug, Deserialize)]
struct UpdateSessionRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    title: Option<String>,
}

async fn api_update_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateSessionRequest>,
) -> Result<StatusCode, ApiError> {
    if state
        .settings
        .update_session(id.clone(), req.messages, req.title)
        .await?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session {id} not found")))
    }
}

async fn api_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.settings.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
