// HTTP request handlers
// Author: kelexine (https://github.com/kelexine)

use super::routes::AppState;
use crate::auth::bearer_key;
use crate::error::{ProxyError, Result};
use crate::models::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ImageData, ImageGenerationRequest,
    ImageGenerationResponse, ImageResponseFormat, MessageContent, ModelList,
};
use crate::storage::image_content_type;
use crate::translation::{translate_stream, ImageMode, TurnContext, TurnDeps, TurnStream, TurnSummary};
use crate::upstream::{UpstreamClient, UpstreamSession};
use crate::usage::usage_for;
use crate::utils::logging::scrub;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    checks.insert(
        "upstream".to_string(),
        HealthCheck {
            status: "ok".to_string(),
            message: format!("Upstream root: {}", state.upstream.root()),
        },
    );
    checks.insert(
        "models".to_string(),
        HealthCheck {
            status: if state.registry.names().is_empty() { "warning" } else { "ok" }.to_string(),
            message: format!("{} model(s) configured", state.registry.names().len()),
        },
    );

    Json(HealthResponse {
        status: "healthy".to_string(),
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

pub async fn models_handler(State(state): State<AppState>) -> Json<ModelList> {
    Json(ModelList::from_names(state.registry.names()))
}

/// Resolve the caller's bearer key to an upstream access token.
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<String> {
    let key = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_key)
        .ok_or_else(|| ProxyError::Unauthorized("missing bearer key".to_string()))?;

    state
        .credentials
        .resolve(key)
        .await?
        .ok_or_else(|| ProxyError::Unauthorized("invalid API key".to_string()))
}

/// Open an upstream turn and start translating it.
async fn open_turn(
    state: &AppState,
    session: &UpstreamSession,
    model: &str,
    messages: &[ChatMessage],
    image_mode: ImageMode,
) -> Result<TurnStream> {
    let profile = state.registry.resolve(model)?;
    let outbound = session.outbound_messages(messages, profile).await;
    let payload = UpstreamClient::build_payload(
        &outbound,
        profile,
        state.config.output.delete_turn_after_response,
    );
    let source = session.start_conversation(&payload).await?;

    let deps = TurnDeps::new(
        Arc::new(session.clone()),
        state.store.clone(),
        state.config.output.clone(),
    );
    let ctx = TurnContext::new(model, image_mode, state.config.stream.clone());
    debug!("Translating turn {} for model {}", ctx.id, model);
    Ok(translate_stream(source, ctx, deps))
}

/// Hide the turn's conversation in the background when configured to.
fn hide_after_turn(state: &AppState, session: UpstreamSession, summary: &TurnSummary) {
    if !state.config.output.delete_turn_after_response {
        return;
    }
    let Some(conversation_id) = summary.conversation_id.clone() else {
        return;
    };
    let sanitize = state.config.logging.sanitize_tokens;
    tokio::spawn(async move {
        if let Err(e) = session.hide_conversation(&conversation_id).await {
            warn!("Failed to hide conversation {}: {}", conversation_id, scrub(&e.to_string(), sanitize));
        }
    });
}

/// Handler for /v1/chat/completions (OpenAI Chat Completions compatible)
pub async fn chat_completions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let req: ChatCompletionRequest = serde_json::from_str(&body).map_err(|e| {
        error!("Failed to deserialize request: {}", e);
        ProxyError::InvalidRequest(format!("JSON deserialization error: {}", e))
    })?;
    if req.messages.is_empty() {
        return Err(ProxyError::InvalidRequest("messages must not be empty".to_string()));
    }

    let token = authorize(&state, &headers).await?;
    let stream = req.stream.unwrap_or(false);
    info!(
        "Received chat request: model={}, messages={}, stream={}",
        req.model,
        req.messages.len(),
        stream
    );

    let session = UpstreamSession::new(state.upstream.clone(), token);
    let turn = open_turn(&state, &session, &req.model, &req.messages, ImageMode::Inline).await?;

    if stream {
        let hide_state = state.clone();
        let events = turn.into_sse(move |summary| hide_after_turn(&hide_state, session, &summary));

        return Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .header("X-Accel-Buffering", "no")
            .body(Body::from_stream(events))
            .map_err(|e| ProxyError::Internal(format!("failed to build response: {}", e)));
    }

    let ctx = turn.context().clone();
    let summary = turn.collect().await;
    hide_after_turn(&state, session, &summary);

    let usage = usage_for(&req.messages, &summary.text);
    let response = ChatCompletionResponse::new(&ctx.id, ctx.created, &ctx.model, summary.text, usage);
    Ok(Json(response).into_response())
}

/// Handler for /v1/images/generations
pub async fn images_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response> {
    let req: ImageGenerationRequest = serde_json::from_str(&body)
        .map_err(|e| ProxyError::InvalidRequest(format!("JSON deserialization error: {}", e)))?;
    if req.prompt.trim().is_empty() {
        return Err(ProxyError::InvalidRequest("prompt must not be empty".to_string()));
    }

    let token = authorize(&state, &headers).await?;
    let b64_json = req.response_format == ImageResponseFormat::B64Json;
    info!("Received image request: model={}, b64_json={}", req.model, b64_json);

    let messages = [ChatMessage {
        role: "user".to_string(),
        content: MessageContent::Text(format!("{}{}", state.config.images.prompt_prefix, req.prompt)),
    }];
    let session = UpstreamSession::new(state.upstream.clone(), token);
    let turn = open_turn(
        &state,
        &session,
        &req.model,
        &messages,
        ImageMode::SideChannel { b64_json },
    )
    .await?;

    let ctx = turn.context().clone();
    let summary = turn.collect().await;
    hide_after_turn(&state, session, &summary);

    if summary.images.is_empty() {
        return Err(ProxyError::ContentPolicyViolation(summary.text.trim().to_string()));
    }

    let data = summary
        .images
        .into_iter()
        .map(|record| ImageData {
            revised_prompt: summary.text.clone(),
            url: (!b64_json).then(|| record.value.clone()),
            b64_json: b64_json.then_some(record.value),
        })
        .collect();

    Ok(Json(ImageGenerationResponse {
        created: ctx.created,
        data,
    })
    .into_response())
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

/// Serve an image stored by the gateway.
pub async fn image_file_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.store.open_image(&name).await {
        Ok(Some(bytes)) => ([(header::CONTENT_TYPE, image_content_type(&name))], bytes).into_response(),
        Ok(None) => not_found(),
        Err(ProxyError::Storage(e)) => {
            debug!("Rejected image name: {}", e);
            not_found()
        }
        Err(e) => e.into_response(),
    }
}

/// Serve a sandbox file stored by the gateway.
pub async fn sandbox_file_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.store.open_file(&name).await {
        Ok(Some(bytes)) => {
            let disposition = format!("attachment; filename*=UTF-8''{}", urlencoding::encode(&name));
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Ok(None) => not_found(),
        Err(ProxyError::Storage(e)) => {
            debug!("Rejected file name: {}", e);
            not_found()
        }
        Err(e) => e.into_response(),
    }
}
