use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use food_validator::config::AppConfig;
use food_validator::routes::metrics::describe_metrics;
use food_validator::services::broker::RedisBroker;
use food_validator::services::classifier::ClassificationAdapter;
use food_validator::services::queue::TaskQueue;
use food_validator::services::resources::StaticResources;
use food_validator::services::vision::MessagesApiClient;
use food_validator::services::worker::Worker;
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

    tracing::info!("Starting food validation worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr.parse().expect("METRICS_ADDR must be a socket address");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        describe_metrics();
        tracing::info!(%addr, "Prometheus exporter listening");
    }

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
    let queue = Arc::new(TaskQueue::new(
        &config.queue_name,
        Arc::new(broker),
        config.job_options(),
    ));
    queue.spawn_event_log();

    tracing::info!(model = %config.model_name, "Initializing vision model client");
    let settings = config.model_settings().expect("Invalid model configuration");
    let model = MessagesApiClient::new(settings).expect("Failed to initialize model client");
    let adapter = Arc::new(ClassificationAdapter::new(
        Arc::new(model),
        resources.system_prompt(),
    ));

    Worker::new(queue, adapter, config.worker_options())
        .run(shutdown_signal())
        .await;
}
