use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Response for POST /upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub job_id: Uuid,
    pub message: String,
}

/// Response for POST /process/{job_id}.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Response for GET /result/{job_id}.
///
/// `result` and `error` appear only once the job is terminal; a job still
/// processing exposes just its status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fire-and-forget client telemetry event for POST /track.
#[derive(Debug, Deserialize)]
pub struct TrackEvent {
    pub event: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}
