use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use metrics::counter;
use tracing::info;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{JobResultResponse, ProcessResponse, TrackEvent, UploadResponse};
use crate::models::job::JobStatus;
use crate::models::pipeline::PipelineResult;
use crate::routes::ApiError;

/// POST /upload — accept an image and create a pending enhancement job.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let (content_type, data) = read_image_field(multipart).await?;
    validate_upload(&content_type, &data, state.config.max_image_size)?;

    let job_id = Uuid::new_v4();
    let path = state
        .store
        .save(job_id, &data)
        .await
        .map_err(|e| ApiError::internal("failed to store image").with_detail(e.to_string()))?;

    let job = queries::create_job(&state.db, job_id, &path, &content_type).await?;

    counter!("enhancement_jobs_submitted_total").increment(1);
    info!(job_id = %job.id, content_type = %content_type, size = data.len(), "image uploaded");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            job_id: job.id,
            message: "image uploaded, ready for processing".to_string(),
        }),
    ))
}

/// POST /process/{job_id} — kick off the pipeline for an uploaded job.
///
/// Idempotent: a job already processing or terminal is reported as-is,
/// never restarted.
pub async fn start_processing(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessResponse>, ApiError> {
    let job = queries::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;

    let claimed = state.orchestrator.start(job_id).await?;
    let status = if claimed {
        JobStatus::Processing
    } else {
        job.status
    };

    Ok(Json(ProcessResponse { job_id, status }))
}

/// GET /result/{job_id} — poll a job.
///
/// The result payload is exposed only once the job is terminal; while
/// processing, callers see the bare status even though stage progress is
/// already persisted.
pub async fn get_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResultResponse>, ApiError> {
    let job = queries::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;

    let terminal = job.status.is_terminal();
    Ok(Json(JobResultResponse {
        job_id,
        status: job.status,
        result: if terminal { job.result } else { None },
        error: if terminal { job.error } else { None },
    }))
}

/// POST /analyze — run the full pipeline synchronously on an uploaded
/// image without creating a job. Bounded by the same concurrency limit as
/// background processing.
pub async fn analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<PipelineResult>, ApiError> {
    let (content_type, data) = read_image_field(multipart).await?;
    validate_upload(&content_type, &data, state.config.max_image_size)?;

    let result = state
        .orchestrator
        .run_now(&data)
        .await
        .map_err(|e| ApiError::internal("analysis failed").with_detail(e.to_string()))?;

    Ok(Json(result))
}

/// POST /track — fire-and-forget client telemetry.
pub async fn track(Json(event): Json<TrackEvent>) -> StatusCode {
    counter!("client_track_events_total").increment(1);
    info!(event = %event.event, data = ?event.data, "client event");
    StatusCode::ACCEPTED
}

/// Pull the image out of a multipart body. Accepts the field under either
/// `file` or `image`.
async fn read_image_field(mut multipart: Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request("malformed multipart body").with_detail(e.to_string()))?
    {
        if !matches!(field.name(), Some("file") | Some("image")) {
            continue;
        }

        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request("failed to read upload").with_detail(e.to_string()))?;

        return Ok((content_type, data.to_vec()));
    }

    Err(ApiError::bad_request(
        "missing image field (expected multipart field \"file\" or \"image\")",
    ))
}

/// Upload acceptance rules: image/* content type, non-empty, within the
/// configured size limit, and bytes a known image decoder recognizes.
fn validate_upload(content_type: &str, data: &[u8], max_size: usize) -> Result<(), ApiError> {
    if !content_type.starts_with("image/") {
        return Err(ApiError::unsupported_media(format!(
            "unsupported content type: {content_type}"
        )));
    }
    if data.is_empty() {
        return Err(ApiError::bad_request("uploaded image is empty"));
    }
    if data.len() > max_size {
        return Err(ApiError::bad_request(format!(
            "image exceeds size limit of {max_size} bytes"
        )));
    }
    image::guess_format(data)
        .map_err(|_| ApiError::unsupported_media("bytes are not a recognized image format"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[test]
    fn accepts_png_upload() {
        assert!(validate_upload("image/png", PNG_MAGIC, 1024).is_ok());
    }

    #[test]
    fn rejects_empty_upload() {
        let err = validate_upload("image/png", b"", 1024).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rejects_non_image_content_type() {
        let err = validate_upload("application/pdf", PNG_MAGIC, 1024).unwrap_err();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn rejects_oversized_upload() {
        let data = vec![0u8; 32];
        let err = validate_upload("image/png", &data, 16).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn rejects_bytes_no_decoder_recognizes() {
        let err = validate_upload("image/png", b"definitely not an image", 1024).unwrap_err();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
