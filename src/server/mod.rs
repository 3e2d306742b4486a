//! Axum-based HTTP server implementation for the chatbridge gateway.
//!
//! This module sets up the HTTP server, configures routes and handles
//! requests from clients that expect an OpenAI-compatible API, bridging
//! them to the upstream conversation service.
//!
//! # Components
//!
//! - `handlers`: Implementation of individual API endpoints (chat, images, models, artifacts).
//! - `middleware`: Request ID, CORS and body-limit layers.
//! - `routes`: The router configuration that ties everything together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod handlers;
mod middleware;
mod routes;

pub use routes::{create_router, AppState};
