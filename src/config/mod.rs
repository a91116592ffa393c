use garde::Validate;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Ignored by the standalone worker.
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Root directory holding the job database and stored images
    #[serde(default = "default_data_dir")]
    #[garde(skip)]
    pub data_dir: PathBuf,

    /// Public base URL used to build output image URLs
    #[serde(default = "default_base_url")]
    #[garde(length(min = 1))]
    pub base_url: String,

    /// OpenRouter API key
    #[garde(length(min = 1))]
    pub openrouter_api_key: String,

    /// Default image model, overridable per job
    #[serde(default = "default_model")]
    #[garde(length(min = 1, max = 200))]
    pub openrouter_model: String,

    /// OpenRouter API root
    #[serde(default = "default_openrouter_base_url")]
    #[garde(length(min = 1))]
    pub openrouter_base_url: String,

    /// Timeout for a single remote edit attempt
    #[serde(default = "default_edit_timeout_secs")]
    #[garde(range(min = 1, max = 600))]
    pub edit_timeout_secs: u64,

    /// Automatic retries on transient remote failures
    #[serde(default = "default_edit_max_retries")]
    #[garde(range(max = 2))]
    pub edit_max_retries: u32,

    /// Backoff before the first retry; doubles per attempt
    #[serde(default = "default_edit_retry_backoff_ms")]
    #[garde(range(max = 60_000))]
    pub edit_retry_backoff_ms: u64,

    /// Number of concurrent processing workers
    #[serde(default = "default_worker_count")]
    #[garde(range(min = 1, max = 64))]
    pub worker_count: usize,

    /// Capacity of the in-process work channel
    #[serde(default = "default_queue_capacity")]
    #[garde(range(min = 1))]
    pub queue_capacity: usize,

    /// Interval of the pending-job sweep
    #[serde(default = "default_sweep_interval_secs")]
    #[garde(range(min = 1))]
    pub sweep_interval_secs: u64,

    /// Upper bound on a multipart submission body
    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1024))]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_model() -> String {
    "google/gemini-2.5-flash-image".to_string()
}

fn default_openrouter_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_edit_timeout_secs() -> u64 {
    180
}

fn default_edit_max_retries() -> u32 {
    1
}

fn default_edit_retry_backoff_ms() -> u64 {
    2000
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Build from explicit `(VAR, value)` pairs; unset variables take their defaults.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let config: Self = envy::from_iter(pairs.into_iter().map(|(k, v)| (k.into(), v.into())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("jobs.sqlite3")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    pub fn edit_timeout(&self) -> Duration {
        Duration::from_secs(self.edit_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.edit_retry_backoff_ms)
    }

    /// Upper bound for one whole edit call, retries and backoff included.
    pub fn edit_deadline(&self) -> Duration {
        let attempts = self.edit_max_retries + 1;
        let backoff: Duration = (0..self.edit_max_retries)
            .map(|attempt| self.retry_backoff() * 2u32.pow(attempt))
            .sum();
        self.edit_timeout() * attempts + backoff + Duration::from_secs(5)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
