use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::upstream::UpstreamClient;

pub mod handlers;
pub mod relay;
pub mod types;

/// Shared, read-only state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
    pub max_tokens: u32,
}

impl AppState {
    pub fn new(upstream: UpstreamClient, max_tokens: u32) -> Self {
        Self {
            upstream: Arc::new(upstream),
            max_tokens,
        }
    }
}

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/completion", post(handlers::completion))
}

/// Full application: routes, tracing, CORS and state.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(api_router())
        .layer(TraceLayer::new_for_http())
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}
