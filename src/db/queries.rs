use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{EnhancementJob, JobStatus};

/// Insert a new job in `pending` state. The caller supplies the id so the
/// stored image path and the row stay keyed together.
pub async fn create_job(
    pool: &SqlitePool,
    id: Uuid,
    image_path: &str,
    content_type: &str,
) -> Result<EnhancementJob, sqlx::Error> {
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO jobs (id, status, image_path, content_type, created_at, updated_at)
        VALUES (?1, 'pending', ?2, ?3, ?4, ?4)
        "#,
    )
    .bind(id.to_string())
    .bind(image_path)
    .bind(content_type)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(EnhancementJob {
        id,
        status: JobStatus::Pending,
        image_path: image_path.to_string(),
        content_type: content_type.to_string(),
        created_at: now,
        updated_at: now,
        result: None,
        error: None,
    })
}

/// Fetch a job by id.
pub async fn get_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<EnhancementJob>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, status, image_path, content_type, created_at, updated_at, result, error
        FROM jobs
        WHERE id = ?1
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(job_from_row).transpose()
}

/// Claim a pending job for processing.
///
/// Returns true only for the caller that performed the pending→processing
/// transition; a job already processing or terminal is left untouched,
/// which makes pipeline invocation idempotent.
pub async fn try_mark_processing(pool: &SqlitePool, job_id: Uuid) -> Result<bool, sqlx::Error> {
    let affected = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'processing', updated_at = ?2
        WHERE id = ?1 AND status = 'pending'
        "#,
    )
    .bind(job_id.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Persist incremental stage output while a job is still processing.
pub async fn save_stage_progress(
    pool: &SqlitePool,
    job_id: Uuid,
    partial: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE jobs
        SET result = ?2, updated_at = ?3
        WHERE id = ?1 AND status = 'processing'
        "#,
    )
    .bind(job_id.to_string())
    .bind(partial.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Finish a processing job with its full result.
///
/// Returns false when the job was not in `processing` (already terminal);
/// terminal jobs are never overwritten.
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: Uuid,
    result: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let affected = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'completed', result = ?2, error = NULL, updated_at = ?3
        WHERE id = ?1 AND status = 'processing'
        "#,
    )
    .bind(job_id.to_string())
    .bind(result.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Mark a processing job failed with an error summary.
///
/// Partial stage progress is discarded: a failed poll carries only the
/// status and the error, never a half-built result.
pub async fn fail_job(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
    let affected = sqlx::query(
        r#"
        UPDATE jobs
        SET status = 'failed', result = NULL, error = ?2, updated_at = ?3
        WHERE id = ?1 AND status = 'processing'
        "#,
    )
    .bind(job_id.to_string())
    .bind(error)
    .bind(Utc::now())
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

fn job_from_row(row: SqliteRow) -> Result<EnhancementJob, sqlx::Error> {
    let id_str: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id_str).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).unwrap_or(JobStatus::Pending);

    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    let result: Option<String> = row.try_get("result")?;
    let result = result.and_then(|s| serde_json::from_str(&s).ok());

    Ok(EnhancementJob {
        id,
        status,
        image_path: row.try_get("image_path")?,
        content_type: row.try_get("content_type")?,
        created_at,
        updated_at,
        result,
        error: row.try_get("error")?,
    })
}
