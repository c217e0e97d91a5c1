use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::chat::ChatService;
use crate::llm::{Message, UpstreamError};
use crate::persona::{LinkType, PersonaConfig, PersonaStore};
use crate::prompt::PromptComposer;

const PREVIEW_CHARS: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub personas: Arc<PersonaStore>,
    pub composer: Arc<PromptComposer>,
    pub name: String,
    pub api_key: Option<String>,
    pub admin_key: Option<String>,
}

#[derive(Deserialize)]
pub struct ConfigUpdateRequest {
    pub config: Option<PersonaConfig>,
}

#[derive(Deserialize)]
pub struct TestLinkRequest {
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: LinkType,
}

#[derive(Deserialize)]
pub struct ChatSendRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub conversation_id: Option<Uuid>,
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/config/update", post(handle_config_update))
        .route("/api/knowledge/test-link", post(handle_test_link))
        .route("/api/knowledge/clear-cache", post(handle_clear_cache))
        .route("/api/prompt/preview", get(handle_prompt_preview))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let chat = Router::new()
        .route("/api/chat/send", post(handle_chat_send))
        .route("/api/chat/conversations", get(handle_list_conversations))
        .route("/api/chat/conversations/:id", get(handle_get_conversation))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/health", get(handle_health))
        .route("/api/config/current", get(handle_config_current))
        .route("/api/knowledge/links", get(handle_knowledge_links))
        .merge(admin)
        .merge(chat)
        .with_state(state)
}

fn error(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "error": msg.into() }))).into_response()
}

/// Malformed or mistyped bodies get the same JSON error shape as other 400s.
fn invalid_body(rejection: JsonRejection) -> Response {
    tracing::warn!("Rejected request body: {}", rejection.body_text());
    error(StatusCode::BAD_REQUEST, rejection.body_text())
}

fn bearer_ok(req: &Request, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|t| t == expected)
}

async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !bearer_ok(&req, state.admin_key.as_deref()) {
        return error(StatusCode::UNAUTHORIZED, "Admin token required");
    }
    next.run(req).await
}

async fn require_api(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if !bearer_ok(&req, state.api_key.as_deref()) {
        return error(StatusCode::UNAUTHORIZED, "Access token required");
    }
    next.run(req).await
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "name": state.name,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// --- Persona ---

async fn handle_config_update(
    State(state): State<AppState>,
    payload: Result<Json<ConfigUpdateRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return invalid_body(rejection),
    };
    let Some(config) = req.config else {
        return error(StatusCode::BAD_REQUEST, "Config is required");
    };
    if let Err(e) = config.validate() {
        return error(StatusCode::BAD_REQUEST, e.to_string());
    }

    let links = config.knowledge_links.links.clone();
    let ai_name = config.ai_name().unwrap_or_default().to_string();
    if let Err(e) = state.personas.replace(config) {
        tracing::error!("Config update failed: {e:#}");
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update config");
    }
    state.composer.cache().prune(&links);
    tracing::info!("Config updated for AI: {ai_name}");

    Json(json!({
        "success": true,
        "message": "Config updated successfully",
        "ai_name": ai_name,
    }))
    .into_response()
}

async fn handle_config_current(State(state): State<AppState>) -> impl IntoResponse {
    let persona = state.personas.get();
    let links = persona.as_ref().map(|p| &p.knowledge_links);
    Json(json!({
        "success": true,
        "has_config": persona.is_some(),
        "ai_name": persona.as_ref().and_then(|p| p.ai_name()).unwrap_or("Unknown"),
        "knowledge_links_enabled": links.is_some_and(|l| l.enabled),
        "active_links_count": links.map_or(0, |l| l.active_links().count()),
    }))
}

// --- Knowledge links ---

async fn handle_knowledge_links(State(state): State<AppState>) -> impl IntoResponse {
    let Some(persona) = state.personas.get() else {
        return Json(json!({ "success": true, "enabled": false, "links": [] }));
    };
    let settings = persona.knowledge_links;
    let stats = state.composer.cache().stats();
    Json(json!({
        "success": true,
        "enabled": settings.enabled,
        "links": settings.links,
        "cache_info": {
            "total_cached": stats.entries,
            "oldest_fetch": stats.oldest_fetch,
            "newest_fetch": stats.newest_fetch,
            "cache_duration_hours": settings.cache_duration_hours,
        },
    }))
}

async fn handle_test_link(
    State(state): State<AppState>,
    payload: Result<Json<TestLinkRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return invalid_body(rejection),
    };
    if req.url.trim().is_empty() {
        return error(StatusCode::BAD_REQUEST, "URL is required");
    }
    tracing::info!("Testing knowledge link: {}", req.url);
    let content = state.composer.cache().fetcher().fetch(&req.url, req.kind).await;

    let length = content.chars().count();
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if length > PREVIEW_CHARS {
        preview.push_str("...");
    }
    Json(json!({
        "success": true,
        "url": req.url,
        "type": req.kind.as_str(),
        "content_length": length,
        "content_preview": preview,
        "full_content": content,
    }))
    .into_response()
}

async fn handle_clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    let cache = state.composer.cache();
    let cleared = cache.clear();
    Json(json!({
        "success": true,
        "message": format!("Cleared {cleared} cached items"),
        "cleared": cleared,
        "cache_size": cache.len(),
    }))
}

async fn handle_prompt_preview(State(state): State<AppState>) -> impl IntoResponse {
    let persona = state.personas.get();
    let prompt = state.composer.compose(persona.as_ref()).await;
    Json(json!({ "prompt": prompt }))
}

// --- Chat ---

async fn handle_chat_send(
    State(state): State<AppState>,
    payload: Result<Json<ChatSendRequest>, JsonRejection>,
) -> Response {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => return invalid_body(rejection),
    };
    if !req.messages.iter().any(|m| m.role == "user") {
        return error(StatusCode::BAD_REQUEST, "Messages are required");
    }
    match state
        .chat
        .send(req.messages, req.model.as_deref(), req.conversation_id)
        .await
    {
        Ok(reply) => Json(json!({
            "success": true,
            "content": reply.content,
            "conversation_id": reply.conversation_id,
            "usage": reply.usage,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!("Chat error: {e:#}");
            match e.downcast_ref::<UpstreamError>().map(|u| u.status) {
                Some(401) => error(StatusCode::UNAUTHORIZED, "LLM API key is invalid"),
                Some(429) => error(
                    StatusCode::TOO_MANY_REQUESTS,
                    "LLM rate limit exceeded, try again later",
                ),
                _ => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            }
        }
    }
}

async fn handle_list_conversations(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "conversations": state.chat.conversations().list(),
    }))
}

async fn handle_get_conversation(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.chat.conversations().get(id) {
        Some(conv) => Json(json!({ "success": true, "conversation": conv })).into_response(),
        None => error(StatusCode::NOT_FOUND, "Conversation not found"),
    }
}
