use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/event/{name}/", post(handlers::handle_event))
        .route("/health/", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
