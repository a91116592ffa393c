use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::services::storage::ImageRef;

/// Status of a face-swap job.
///
/// Progression is forward-only: `pending -> processing -> succeeded | failed`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// The only status a job may hold immediately before entering `self`.
    pub fn predecessor(self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => None,
            JobStatus::Processing => Some(JobStatus::Pending),
            JobStatus::Succeeded | JobStatus::Failed => Some(JobStatus::Processing),
        }
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        next.predecessor() == Some(self)
    }
}

/// A face-swap job as persisted in the job store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceSwapJob {
    pub reference_id: String,
    pub status: JobStatus,
    pub source_ref: ImageRef,
    pub face_ref: ImageRef,
    pub model_id: Option<String>,
    pub output_ref: Option<ImageRef>,
    pub error: Option<String>,
    pub processing_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Inputs for a new pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_ref: ImageRef,
    pub face_ref: ImageRef,
    pub model_id: Option<String>,
}

/// A state change applied by the job processor.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Processing,
    Succeeded {
        output_ref: ImageRef,
        processing_ms: i64,
    },
    Failed {
        error: String,
        processing_ms: i64,
    },
}

impl JobUpdate {
    pub fn target_status(&self) -> JobStatus {
        match self {
            JobUpdate::Processing => JobStatus::Processing,
            JobUpdate::Succeeded { .. } => JobStatus::Succeeded,
            JobUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}
