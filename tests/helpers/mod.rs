//! Test helper utilities shared by the integration and E2E suites
#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use face_swap_api::{
    app_state::AppState,
    config::AppConfig,
    db::{self, queries},
    models::job::{FaceSwapJob, NewJob},
    routes::{self, metrics::MetricsState},
    services::{
        editor::{EditError, ImageEditor},
        processor::JobProcessor,
        queue::JobQueue,
        storage::ImageStore,
        worker::WorkerPool,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use reqwest::multipart;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::sleep;

pub const TEST_BASE_URL: &str = "http://testserver";
pub const MULTIPART_BOUNDARY: &str = "face-swap-test-boundary";

/// Build a config rooted at `data_dir`, layering `overrides` on the defaults.
pub fn test_config(data_dir: &Path, overrides: &[(&str, &str)]) -> AppConfig {
    let mut pairs = vec![
        ("OPENROUTER_API_KEY".to_string(), "test-key".to_string()),
        ("DATA_DIR".to_string(), data_dir.display().to_string()),
        ("BASE_URL".to_string(), TEST_BASE_URL.to_string()),
        ("OPENROUTER_BASE_URL".to_string(), "http://127.0.0.1:9".to_string()),
    ];
    pairs.extend(overrides.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    AppConfig::from_pairs(pairs).expect("valid test config")
}

/// Isolated job store, image directory and queue in a temporary directory.
pub struct TestEnv {
    pub config: AppConfig,
    pub db: SqlitePool,
    pub images: Arc<ImageStore>,
    pub queue: Arc<JobQueue>,
    receiver: Option<mpsc::Receiver<String>>,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_overrides(&[]).await
    }

    pub async fn with_overrides(overrides: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = test_config(dir.path(), overrides);

        let db = db::init_pool(&config.db_path())
            .await
            .expect("open job store");
        db::run_migrations(&db).await.expect("run migrations");

        let images = Arc::new(
            ImageStore::open(config.images_dir(), &config.base_url)
                .await
                .expect("open image store"),
        );
        let (queue, receiver) = JobQueue::new(config.queue_capacity);

        Self {
            config,
            db,
            images,
            queue: Arc::new(queue),
            receiver: Some(receiver),
            _dir: dir,
        }
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.db.clone(), Arc::clone(&self.images), Arc::clone(&self.queue))
    }

    pub fn router(&self) -> Router {
        routes::api_router(self.state(), self.config.max_upload_bytes)
    }

    /// The production router with the full middleware stack and `/metrics`.
    pub fn app(&self) -> Router {
        let metrics_state = MetricsState {
            handle: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
            queue: Arc::clone(&self.queue),
        };
        routes::app(self.state(), metrics_state, self.config.max_upload_bytes)
    }

    pub fn processor(&self, editor: Arc<dyn ImageEditor>) -> Arc<JobProcessor> {
        Arc::new(JobProcessor::new(
            self.db.clone(),
            Arc::clone(&self.images),
            editor,
            &self.config,
        ))
    }

    /// Hand the queue's receiving side to a worker pool.
    pub fn start_workers(&mut self, editor: Arc<dyn ImageEditor>, count: usize) -> WorkerPool {
        let receiver = self.take_receiver();
        WorkerPool::spawn(self.processor(editor), receiver, count)
    }

    pub fn take_receiver(&mut self) -> mpsc::Receiver<String> {
        self.receiver.take().expect("receiver already taken")
    }

    /// Store both inputs and insert a pending job, bypassing HTTP.
    pub async fn seed_job(&self, base: &[u8], selfie: &[u8]) -> FaceSwapJob {
        let source_ref = self.images.put(base).await.expect("store base image");
        let face_ref = self.images.put(selfie).await.expect("store selfie");
        queries::create_job(
            &self.db,
            &NewJob {
                source_ref,
                face_ref,
                model_id: None,
            },
        )
        .await
        .expect("create job")
    }

    /// Number of files in the image directory, temporary files included.
    pub fn stored_file_count(&self) -> usize {
        std::fs::read_dir(self.images.root())
            .expect("read image dir")
            .count()
    }
}

/// Editor returning fixed bytes after an optional delay, counting calls.
pub struct StaticEditor {
    output: Vec<u8>,
    delay: Duration,
    calls: AtomicUsize,
    models: std::sync::Mutex<Vec<String>>,
}

impl StaticEditor {
    pub fn new(output: Vec<u8>) -> Self {
        Self::with_delay(output, Duration::ZERO)
    }

    pub fn with_delay(output: Vec<u8>, delay: Duration) -> Self {
        Self {
            output,
            delay,
            calls: AtomicUsize::new(0),
            models: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn models_seen(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageEditor for StaticEditor {
    async fn edit(
        &self,
        _source_image: &[u8],
        _face_image: &[u8],
        model_id: &str,
    ) -> Result<Vec<u8>, EditError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.models.lock().unwrap().push(model_id.to_string());
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        Ok(self.output.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Editor that always fails with the given error.
pub struct FailingEditor(pub EditError);

#[async_trait]
impl ImageEditor for FailingEditor {
    async fn edit(&self, _: &[u8], _: &[u8], _: &str) -> Result<Vec<u8>, EditError> {
        Err(self.0.clone())
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Editor that never answers.
pub struct HangingEditor;

#[async_trait]
impl ImageEditor for HangingEditor {
    async fn edit(&self, _: &[u8], _: &[u8], _: &str) -> Result<Vec<u8>, EditError> {
        std::future::pending().await
    }

    fn name(&self) -> &str {
        "hanging"
    }
}

/// A multipart part: field name, optional file name, body.
pub struct Part<'a> {
    pub name: &'a str,
    pub filename: Option<&'a str>,
    pub body: &'a [u8],
}

impl<'a> Part<'a> {
    pub fn file(name: &'a str, filename: &'a str, body: &'a [u8]) -> Self {
        Self {
            name,
            filename: Some(filename),
            body,
        }
    }

    pub fn text(name: &'a str, body: &'a str) -> Self {
        Self {
            name,
            filename: None,
            body: body.as_bytes(),
        }
    }
}

/// Encode parts as a `multipart/form-data` body for in-process requests.
pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name)
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(part.body);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}")
}

/// Poll the job store until the job is succeeded or failed.
pub async fn wait_for_terminal(db: &SqlitePool, reference_id: &str, timeout: Duration) -> FaceSwapJob {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = queries::get_job(db, reference_id)
            .await
            .expect("read job")
            .expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {reference_id} still {} after {:?}",
            job.status,
            timeout
        );
        sleep(Duration::from_millis(25)).await;
    }
}

/// Response from POST /api/v1/face-swap/jobs
#[derive(Debug, Deserialize)]
pub struct CreateJobResponse {
    pub reference_id: String,
    pub status: String,
}

/// Response from GET /api/v1/face-swap/jobs/{reference_id}
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub reference_id: String,
    pub status: String,
    pub output_ref: Option<String>,
    pub error: Option<String>,
    pub processing_ms: Option<i64>,
}

/// Upload a base image and selfie to a running server
pub async fn upload_face_swap(
    client: &reqwest::Client,
    base_url: &str,
    base_image: Vec<u8>,
    selfie: Vec<u8>,
) -> Result<CreateJobResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new()
        .part("base_image", multipart::Part::bytes(base_image).file_name("base.png"))
        .part("selfie", multipart::Part::bytes(selfie).file_name("selfie.jpg"));

    let response = client
        .post(format!("{}/api/v1/face-swap/jobs", base_url))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<CreateJobResponse>().await?)
}

/// Poll job status until succeeded or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    reference_id: &str,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/face-swap/jobs/{}", base_url, reference_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<JobStatusResponse>().await?;

        match status_response.status.as_str() {
            "succeeded" | "failed" => return Ok(status_response),
            "pending" | "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown job status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
