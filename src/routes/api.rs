//! Plain HTTP route configuration.

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::handlers::api::{health_check, new_session};
use crate::state::AppState;

/// `GET /health` and `GET /session/new`.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/session/new", get(new_session))
}
