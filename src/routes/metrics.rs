use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the metrics recorded by the gateway and worker.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "food_validation_jobs_submitted",
        "Food validation tasks accepted by the gateway"
    );
    metrics::describe_counter!(
        "food_validation_jobs_completed",
        "Food validation jobs completed with a result"
    );
    metrics::describe_counter!(
        "food_validation_jobs_retried",
        "Failed attempts that were scheduled for retry"
    );
    metrics::describe_counter!(
        "food_validation_jobs_failed",
        "Food validation jobs that failed permanently"
    );
    metrics::describe_histogram!(
        "food_validation_processing_seconds",
        "Time spent classifying one job attempt"
    );
    metrics::describe_gauge!(
        "food_validation_queue_depth",
        "Waiting, delayed and active jobs at the last queue-status call"
    );
}

/// GET /metrics — Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
