use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::SubmitResponse;
use crate::models::job::JobRecord;
use crate::services::job_store::JobStoreError;
use crate::services::storage::StorageError;

/// POST /jobs — Upload a file and register a PENDING job for it.
///
/// No content validation happens here: an undecodable upload is accepted and
/// fails at processing time, landing in the job's `error` field.
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, StatusCode> {
    let mut upload: Option<(String, bytes::Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("upload.bin").to_string();
            let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;
            upload = Some((filename, data));
        }
    }

    let (filename, data) = upload.ok_or(StatusCode::BAD_REQUEST)?;
    if data.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let record = state.jobs.create(&filename, data).await.map_err(|e| {
        tracing::error!(error = %e, "failed to create job");
        match e {
            JobStoreError::RegistryFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    })?;

    metrics::counter!("jobs_submitted_total").increment(1);

    Ok(Json(SubmitResponse {
        job_id: record.id,
        status: record.status,
    }))
}

/// GET /jobs/{id} — Full job record, or 404 for an unknown id.
pub async fn job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRecord>, StatusCode> {
    match state.jobs.get(id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "failed to read job");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /jobs/{id}/result — The output bytes. 404 both for an unknown id and
/// for a job that has not produced a result yet.
pub async fn job_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let record = state
        .jobs
        .get(id)
        .await
        .map_err(|e| {
            tracing::error!(job_id = %id, error = %e, "failed to read job");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let Some(result_path) = record.result_path else {
        return Err(StatusCode::NOT_FOUND);
    };

    let bytes = state.storage.get(&result_path).await.map_err(|e| match e {
        StorageError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
        other => {
            tracing::error!(job_id = %id, error = %other, "failed to fetch result object");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}
