use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use face_swap_api::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries},
    models::job::JobStatus,
    routes::{self, metrics::MetricsState},
    services::{
        editor::OpenRouterClient,
        processor::JobProcessor,
        queue::JobQueue,
        storage::ImageStore,
        worker::{self, WorkerPool},
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!(
        base_url = %config.base_url,
        data_dir = %config.data_dir.display(),
        model = %config.openrouter_model,
        workers = config.worker_count,
        "Initializing face-swap-api server"
    );

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_histogram!(
        "face_swap_processing_seconds",
        "Time to process a face-swap job"
    );
    metrics::describe_counter!("face_swap_jobs_total", "Total face-swap jobs submitted");
    metrics::describe_counter!("face_swap_jobs_succeeded", "Total face-swap jobs succeeded");
    metrics::describe_counter!("face_swap_jobs_failed", "Total face-swap jobs that failed");
    metrics::describe_gauge!(
        "face_swap_queue_depth",
        "Job ids waiting in the in-process queue"
    );

    // Initialize job store
    tracing::info!(path = %config.db_path().display(), "Opening SQLite job store");
    let db_pool = db::init_pool(&config.db_path())
        .await
        .expect("Failed to open job store");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    match queries::count_jobs_by_status(&db_pool).await {
        Ok(counts) => {
            for (status, n) in counts {
                if status == JobStatus::Processing && n > 0 {
                    tracing::warn!(
                        count = n,
                        "Jobs left in processing by a previous run; they are not retried automatically"
                    );
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not inspect job store"),
    }

    // Initialize image store
    let images = Arc::new(
        ImageStore::open(config.images_dir(), &config.base_url)
            .await
            .expect("Failed to open image store"),
    );

    // Initialize OpenRouter client
    tracing::info!("Initializing OpenRouter image editor");
    let editor = OpenRouterClient::new(&config).expect("Failed to initialize OpenRouter client");

    // Start worker pool
    let (queue, receiver) = JobQueue::new(config.queue_capacity);
    let queue = Arc::new(queue);
    let processor = Arc::new(JobProcessor::new(
        db_pool.clone(),
        Arc::clone(&images),
        Arc::new(editor),
        &config,
    ));
    let pool = WorkerPool::spawn(processor, receiver, config.worker_count);
    tracing::info!(workers = pool.size(), "Worker pool started");

    // Pick up jobs accepted but never started by a previous run
    if let Err(e) = worker::requeue_pending(&db_pool, &queue, Duration::ZERO).await {
        tracing::error!(error = %e, "Startup recovery of pending jobs failed");
    }
    let sweep = worker::spawn_pending_sweep(
        db_pool.clone(),
        Arc::clone(&queue),
        config.sweep_interval(),
    );

    let state = AppState::new(db_pool, images, Arc::clone(&queue));
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: Arc::clone(&queue),
    };

    let app = routes::app(state, metrics_state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Close the queue so workers finish what was handed to them and exit
    sweep.abort();
    drop(queue);
    tracing::info!("Waiting for workers to drain the queue");
    pool.join().await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
