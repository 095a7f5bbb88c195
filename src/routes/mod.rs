use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::app_state::AppState;

pub mod error;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod validate;

/// Largest accepted upload.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// API routes of the gateway.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/validate-food", post(validate::submit_food))
        .route("/task-status/{task_id}", get(validate::get_task_status))
        .route("/queue-status", get(queue::queue_status))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}
