use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

use crate::config::AppConfig;
use crate::db::{queries, JobStoreError};
use crate::models::job::{FaceSwapJob, JobStatus, JobUpdate};
use crate::services::editor::{EditError, ImageEditor};
use crate::services::storage::{ImageRef, ImageStore, StorageError};

/// What happened to a job handed to [`JobProcessor::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Another worker owns the job, or it already finished.
    Skipped,
    Succeeded,
    Failed,
}

/// Reason a processing attempt ended in `failed`.
#[derive(Debug, thiserror::Error)]
enum JobFailure {
    #[error(transparent)]
    Edit(#[from] EditError),

    #[error("storage_failure: {0}")]
    Storage(#[from] StorageError),
}

/// Drives a single job from pending to a terminal state.
pub struct JobProcessor {
    db: SqlitePool,
    images: Arc<ImageStore>,
    editor: Arc<dyn ImageEditor>,
    default_model: String,
    edit_deadline: Duration,
}

impl JobProcessor {
    pub fn new(
        db: SqlitePool,
        images: Arc<ImageStore>,
        editor: Arc<dyn ImageEditor>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            images,
            editor,
            default_model: config.openrouter_model.clone(),
            edit_deadline: config.edit_deadline(),
        }
    }

    /// Claim the job, run the remote edit and record the terminal status.
    ///
    /// Remote and storage failures end up in the job's `error` field and are
    /// not returned. An `Err` means the job store itself misbehaved; if that
    /// happens after the claim, the job stays `processing`.
    pub async fn process(&self, reference_id: &str) -> Result<ProcessOutcome, JobStoreError> {
        let span = tracing::info_span!("job", reference_id = %reference_id);
        self.process_inner(reference_id).instrument(span).await
    }

    async fn process_inner(&self, reference_id: &str) -> Result<ProcessOutcome, JobStoreError> {
        let Some(job) = queries::claim_job(&self.db, reference_id).await? else {
            tracing::debug!("Job already claimed or finished, skipping");
            return Ok(ProcessOutcome::Skipped);
        };

        tracing::info!(editor = self.editor.name(), "Processing face-swap job");
        let start = Instant::now();
        let result = self.run_edit(&job).await;
        let elapsed = start.elapsed();
        let processing_ms = elapsed.as_millis() as i64;

        metrics::histogram!("face_swap_processing_seconds").record(elapsed.as_secs_f64());

        let output_ref = result.as_ref().ok().cloned();
        let (update, outcome) = match result {
            Ok(output_ref) => (
                JobUpdate::Succeeded {
                    output_ref,
                    processing_ms,
                },
                ProcessOutcome::Succeeded,
            ),
            Err(failure) => {
                tracing::warn!(error = %failure, processing_ms, "Face-swap job failed");
                (
                    JobUpdate::Failed {
                        error: failure.to_string(),
                        processing_ms,
                    },
                    ProcessOutcome::Failed,
                )
            }
        };

        let written = queries::update_job(&self.db, reference_id, update).await;
        if matches!(written, Err(JobStoreError::InvalidTransition { .. })) {
            // The row was not written, so nothing references the output
            if let Some(output_ref) = &output_ref {
                if let Err(e) = self.images.delete(output_ref).await {
                    tracing::warn!(image_ref = %output_ref, error = %e, "Failed to remove orphaned output");
                }
            }
        }

        match written {
            Ok(job) => {
                match job.status {
                    JobStatus::Succeeded => {
                        metrics::counter!("face_swap_jobs_succeeded").increment(1);
                        tracing::info!(processing_ms, "Face-swap job succeeded");
                    }
                    _ => metrics::counter!("face_swap_jobs_failed").increment(1),
                }
                Ok(outcome)
            }
            Err(e @ JobStoreError::InvalidTransition { .. }) => {
                tracing::error!(error = %e, "Terminal write rejected; job left untouched");
                Err(e)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record terminal status; job left processing");
                Err(e)
            }
        }
    }

    async fn run_edit(&self, job: &FaceSwapJob) -> Result<ImageRef, JobFailure> {
        let source = self.images.get(&job.source_ref).await?;
        let face = self.images.get(&job.face_ref).await?;
        let model = job.model_id.as_deref().unwrap_or(&self.default_model);

        tracing::debug!(model = %model, "Calling remote editor");
        let edited = tokio::time::timeout(self.edit_deadline, self.editor.edit(&source, &face, model))
            .await
            .map_err(|_| {
                EditError::RemoteUnavailable(format!(
                    "no result within {}s",
                    self.edit_deadline.as_secs()
                ))
            })??;

        Ok(self.images.put(&edited).await?)
    }
}
