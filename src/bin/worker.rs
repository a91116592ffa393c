use face_swap_api::{
    config::AppConfig,
    db,
    services::{
        editor::OpenRouterClient,
        processor::JobProcessor,
        queue::JobQueue,
        storage::ImageStore,
        worker::{self, WorkerPool},
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Standalone worker: processes pending jobs from a job store shared with the
/// API process, without serving HTTP. Jobs are discovered by polling.
#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting face-swap worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize job store
    tracing::info!(path = %config.db_path().display(), "Opening SQLite job store");
    let db_pool = db::init_pool(&config.db_path())
        .await
        .expect("Failed to open job store");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let images = Arc::new(
        ImageStore::open(config.images_dir(), &config.base_url)
            .await
            .expect("Failed to open image store"),
    );
    let editor = OpenRouterClient::new(&config).expect("Failed to initialize OpenRouter client");

    let (queue, receiver) = JobQueue::new(config.queue_capacity);
    let processor = Arc::new(JobProcessor::new(
        db_pool.clone(),
        images,
        Arc::new(editor),
        &config,
    ));
    let pool = WorkerPool::spawn(processor, receiver, config.worker_count);

    tracing::info!(
        workers = pool.size(),
        poll_secs = config.sweep_interval().as_secs(),
        "Worker ready, starting job polling loop"
    );

    let mut ticker = tokio::time::interval(config.sweep_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    // Main polling loop
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match worker::requeue_pending(&db_pool, &queue, Duration::ZERO).await {
                    Ok(0) => tracing::trace!("No pending jobs"),
                    Ok(n) => tracing::debug!(enqueued = n, "Picked up pending jobs"),
                    Err(e) => tracing::error!(error = %e, "Polling for pending jobs failed, will retry"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for shutdown signal");
                }
                break;
            }
        }
    }

    // Dropping the only sender lets workers finish queued ids and exit
    tracing::info!("Shutdown signal received, draining queue");
    drop(queue);
    pool.join().await;
    tracing::info!("Worker stopped");
}
