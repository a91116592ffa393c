use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::JobStoreError;
use crate::models::job::{FaceSwapJob, JobStatus, JobUpdate, NewJob};
use crate::services::storage::ImageRef;

/// Attempts at drawing a fresh reference id before giving up.
const MAX_ID_ATTEMPTS: usize = 3;

const JOB_COLUMNS: &str = "reference_id, status, source_ref, face_ref, model_id, output_ref, \
                           error, processing_ms, created_at, updated_at";

/// Generate a client-facing reference id (`job_` + 10 hex chars).
pub fn new_reference_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("job_{}", &hex[..10])
}

/// Insert a new pending job under a freshly allocated reference id
pub async fn create_job(pool: &SqlitePool, job: &NewJob) -> Result<FaceSwapJob, JobStoreError> {
    create_job_with(pool, job, new_reference_id).await
}

pub(crate) async fn create_job_with(
    pool: &SqlitePool,
    job: &NewJob,
    mut next_id: impl FnMut() -> String,
) -> Result<FaceSwapJob, JobStoreError> {
    for attempt in 1..=MAX_ID_ATTEMPTS {
        let reference_id = next_id();
        let now = Utc::now();

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO face_swap_jobs
                (reference_id, status, source_ref, face_ref, model_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&reference_id)
        .bind(JobStatus::Pending.as_ref())
        .bind(job.source_ref.as_str())
        .bind(job.face_ref.as_str())
        .bind(job.model_id.as_deref())
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await;

        match result {
            Ok(row) => return job_from_row(&row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                tracing::warn!(reference_id = %reference_id, attempt, "Reference id collision, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(JobStoreError::IdExhausted(MAX_ID_ATTEMPTS))
}

/// Get a job by reference id
pub async fn get_job(
    pool: &SqlitePool,
    reference_id: &str,
) -> Result<Option<FaceSwapJob>, JobStoreError> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM face_swap_jobs WHERE reference_id = ?"
    ))
    .bind(reference_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Apply a forward status change.
///
/// The UPDATE is guarded on the single legal predecessor status, so
/// concurrent writers are serialized by SQLite and at most one of them wins.
pub async fn update_job(
    pool: &SqlitePool,
    reference_id: &str,
    update: JobUpdate,
) -> Result<FaceSwapJob, JobStoreError> {
    let target = update.target_status();
    let (output_ref, error, processing_ms) = match &update {
        JobUpdate::Processing => (None, None, None),
        JobUpdate::Succeeded {
            output_ref,
            processing_ms,
        } => (Some(output_ref.as_str()), None, Some(*processing_ms)),
        JobUpdate::Failed {
            error,
            processing_ms,
        } => (None, Some(error.as_str()), Some(*processing_ms)),
    };

    let Some(expected) = target.predecessor() else {
        return Err(invalid_transition(pool, reference_id, target).await);
    };

    let row = sqlx::query(&format!(
        r#"
        UPDATE face_swap_jobs
        SET status = ?,
            output_ref = ?,
            error = ?,
            processing_ms = COALESCE(?, processing_ms),
            updated_at = ?
        WHERE reference_id = ? AND status = ?
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(target.as_ref())
    .bind(output_ref)
    .bind(error)
    .bind(processing_ms)
    .bind(Utc::now())
    .bind(reference_id)
    .bind(expected.as_ref())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => job_from_row(&row),
        None => Err(invalid_transition(pool, reference_id, target).await),
    }
}

/// Atomically move a pending job to processing.
///
/// Returns `None` when the job exists but is no longer pending, i.e. another
/// worker owns it or it already finished.
pub async fn claim_job(
    pool: &SqlitePool,
    reference_id: &str,
) -> Result<Option<FaceSwapJob>, JobStoreError> {
    match update_job(pool, reference_id, JobUpdate::Processing).await {
        Ok(job) => Ok(Some(job)),
        Err(JobStoreError::InvalidTransition { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Get jobs still pending since before `older_than` (oldest first)
pub async fn get_pending_jobs(
    pool: &SqlitePool,
    older_than: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<FaceSwapJob>, JobStoreError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM face_swap_jobs
        WHERE status = ? AND updated_at <= ?
        ORDER BY created_at ASC
        LIMIT ?
        "#
    ))
    .bind(JobStatus::Pending.as_ref())
    .bind(older_than)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Number of jobs in each status; statuses with no jobs are omitted.
pub async fn count_jobs_by_status(
    pool: &SqlitePool,
) -> Result<Vec<(JobStatus, i64)>, JobStoreError> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM face_swap_jobs GROUP BY status")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|r| -> Result<(JobStatus, i64), JobStoreError> {
            let status: String = r.try_get("status")?;
            let count: i64 = r.try_get("n")?;
            Ok((parse_status(&status)?, count))
        })
        .collect()
}

async fn invalid_transition(pool: &SqlitePool, reference_id: &str, to: JobStatus) -> JobStoreError {
    match get_job(pool, reference_id).await {
        Ok(Some(job)) => JobStoreError::InvalidTransition {
            reference_id: reference_id.to_string(),
            from: job.status,
            to,
        },
        Ok(None) => JobStoreError::NotFound(reference_id.to_string()),
        Err(e) => e,
    }
}

fn parse_status(raw: &str) -> Result<JobStatus, JobStoreError> {
    raw.parse()
        .map_err(|_| JobStoreError::Corrupt(format!("unknown status '{raw}'")))
}

fn parse_ref(raw: String) -> Result<ImageRef, JobStoreError> {
    ImageRef::parse(&raw).map_err(|e| JobStoreError::Corrupt(e.to_string()))
}

fn job_from_row(r: &SqliteRow) -> Result<FaceSwapJob, JobStoreError> {
    let status: String = r.try_get("status")?;
    let output_ref: Option<String> = r.try_get("output_ref")?;

    Ok(FaceSwapJob {
        reference_id: r.try_get("reference_id")?,
        status: parse_status(&status)?,
        source_ref: parse_ref(r.try_get("source_ref")?)?,
        face_ref: parse_ref(r.try_get("face_ref")?)?,
        model_id: r.try_get("model_id")?,
        output_ref: output_ref.map(parse_ref).transpose()?,
        error: r.try_get("error")?,
        processing_ms: r.try_get("processing_ms")?,
        created_at: r.try_get("created_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}
