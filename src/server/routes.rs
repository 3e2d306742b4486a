// HTTP routes configuration
// Author: kelexine (https://github.com/kelexine)

use super::handlers::{
    chat_completions_handler, health_handler, image_file_handler, images_handler, models_handler,
    sandbox_file_handler,
};
use super::middleware::{body_limit_layer, cors_layer, request_id_layers};
use crate::auth::CredentialProvider;
use crate::config::AppConfig;
use crate::models::ModelRegistry;
use crate::storage::FileStore;
use crate::upstream::UpstreamClient;
use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub upstream: Arc<UpstreamClient>,
    pub store: Arc<FileStore>,
}

pub fn create_router(state: AppState) -> Router {
    let (set_request_id, propagate_request_id) = request_id_layers();
    let prefix = state.config.server.api_prefix.trim_matches('/').to_string();

    let api = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/images/generations", post(images_handler))
        .route("/images/:name", get(image_file_handler))
        .route("/files/:name", get(sandbox_file_handler));

    let app = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&format!("/{}", prefix), api)
    };

    app.layer(body_limit_layer())
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state)
}
