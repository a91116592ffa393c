use axum::body::Bytes;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::db::queries;
use crate::error::{AppError, AppResult};
use crate::models::face_swap::{CreateJobResponse, JobStatusResponse, SubmitOptions};
use crate::models::job::NewJob;
use crate::services::storage::ImageRef;
use crate::services::validation;

/// POST /api/v1/face-swap/jobs - Upload a base image and a selfie for swapping.
///
/// Multipart fields: `base_image` (file), `selfie` (file), optional `model` (text).
/// Nothing is persisted unless both images decode as JPEG, PNG or WEBP.
pub async fn create_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<CreateJobResponse>)> {
    let mut base_image: Option<Bytes> = None;
    let mut selfie: Option<Bytes> = None;
    let mut options = SubmitOptions::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, "request"))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "base_image" => base_image = Some(read_image(field, "base_image").await?),
            "selfie" => selfie = Some(read_image(field, "selfie").await?),
            "model" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, "model"))?;
                let text = text.trim();
                if !text.is_empty() {
                    options.model = Some(text.to_string());
                }
            }
            other => tracing::debug!(field = %other, "Ignoring unknown multipart field"),
        }
    }

    let base_image = base_image
        .ok_or_else(|| AppError::InvalidInput("missing required image field 'base_image'".into()))?;
    let selfie =
        selfie.ok_or_else(|| AppError::InvalidInput("missing required image field 'selfie'".into()))?;
    options
        .validate()
        .map_err(|e| AppError::InvalidInput(format!("model: {e}")))?;

    let source_ref = state.images.put(&base_image).await?;
    let face_ref = match state.images.put(&selfie).await {
        Ok(image_ref) => image_ref,
        Err(e) => {
            discard_images(&state, &[&source_ref]).await;
            return Err(e.into());
        }
    };

    let new_job = NewJob {
        source_ref,
        face_ref,
        model_id: options.model,
    };
    let job = match queries::create_job(&state.db, &new_job).await {
        Ok(job) => job,
        Err(e) => {
            discard_images(&state, &[&new_job.source_ref, &new_job.face_ref]).await;
            return Err(e.into());
        }
    };

    metrics::counter!("face_swap_jobs_total").increment(1);

    if let Err(e) = state.queue.enqueue(&job.reference_id) {
        tracing::warn!(
            reference_id = %job.reference_id,
            error = %e,
            "Could not hand job to workers; the pending sweep will pick it up"
        );
    }

    tracing::info!(reference_id = %job.reference_id, "Face-swap job accepted");

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            reference_id: job.reference_id,
            status: job.status,
            message: "Face-swap job accepted".to_string(),
        }),
    ))
}

/// GET /api/v1/face-swap/jobs/{reference_id} - Check face-swap job status.
pub async fn get_job(
    State(state): State<AppState>,
    Path(reference_id): Path<String>,
) -> AppResult<Json<JobStatusResponse>> {
    let job = queries::get_job(&state.db, &reference_id)
        .await?
        .ok_or(AppError::NotFound(reference_id))?;

    Ok(Json(JobStatusResponse::from_job(job, &state.images)))
}

async fn read_image(field: Field<'_>, name: &str) -> AppResult<Bytes> {
    let data = field
        .bytes()
        .await
        .map_err(|e| multipart_error(e, name))?;

    // Full decode is CPU-bound
    let checked = data.clone();
    tokio::task::spawn_blocking(move || validation::validate_image(&checked))
        .await
        .map_err(|e| AppError::Internal(format!("image validation task failed: {e}")))?
        .map_err(|e| AppError::InvalidInput(format!("{name}: {e}")))?;

    Ok(data)
}

/// Best-effort removal of inputs stored for a submission that was not accepted.
async fn discard_images(state: &AppState, refs: &[&ImageRef]) {
    for image_ref in refs {
        if let Err(e) = state.images.delete(image_ref).await {
            tracing::warn!(image_ref = %image_ref, error = %e, "Failed to remove orphaned upload");
        }
    }
}

fn multipart_error(e: MultipartError, name: &str) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::TooLarge(e.body_text())
    } else {
        AppError::InvalidInput(format!("{name}: {}", e.body_text()))
    }
}
