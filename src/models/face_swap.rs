use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Serialize;

use crate::models::job::{FaceSwapJob, JobStatus};
use crate::services::storage::ImageStore;

/// Text portion of a face-swap submission.
#[derive(Debug, Default, Validate)]
pub struct SubmitOptions {
    /// Optional override of the configured remote model.
    #[garde(length(min = 1, max = 200))]
    pub model: Option<String>,
}

/// Response after submitting a face-swap job.
#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub reference_id: String,
    pub status: JobStatus,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub reference_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusResponse {
    /// Render a stored job, resolving the output reference to its public URL.
    pub fn from_job(job: FaceSwapJob, images: &ImageStore) -> Self {
        Self {
            output_ref: job.output_ref.as_ref().map(|r| images.url(r)),
            reference_id: job.reference_id,
            status: job.status,
            error: job.error,
            processing_ms: job.processing_ms,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
