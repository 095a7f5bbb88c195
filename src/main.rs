use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use food_validator::app_state::AppState;
use food_validator::config::AppConfig;
use food_validator::routes;
use food_validator::services::broker::RedisBroker;
use food_validator::services::queue::TaskQueue;
use food_validator::services::resources::StaticResources;
use food_validator::shutdown::shutdown_signal;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing food-validator gateway");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_metrics();

    tracing::info!(path = %config.system_prompt_path, "Loading system prompt");
    let resources = StaticResources::load(&config.system_prompt_path)
        .expect("Failed to load system prompt");

    tracing::info!(
        host = %config.redis_host,
        port = config.redis_port,
        queue = %config.queue_name,
        "Connecting to Redis broker"
    );
    let broker = RedisBroker::connect(config.redis_connection_info(), &config.queue_name)
        .await
        .expect("Failed to connect to Redis");
    let queue = TaskQueue::new(&config.queue_name, Arc::new(broker), config.job_options());

    let state = AppState::new(queue, resources);
    state.queue.spawn_event_log();

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server stopped");
}
