use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::models::api::QueueStatusResponse;
use crate::routes::error::ApiError;

/// GET /queue-status — job counts per state.
pub async fn queue_status(
    State(state): State<AppState>,
) -> Result<Json<QueueStatusResponse>, ApiError> {
    let counts = state.queue.counts().await?;
    metrics::gauge!("food_validation_queue_depth").set(counts.pending() as f64);

    Ok(Json(QueueStatusResponse {
        queue: state.queue.name().to_string(),
        counts,
    }))
}
