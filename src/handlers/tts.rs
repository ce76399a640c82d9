//! Long-form conversion endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::core::job::{ConvertRequest, JobSnapshot};
use crate::core::store::CancelAction;
use crate::errors::AppResult;
use crate::state::AppState;

pub const CHUNK_COUNT_HEADER: &str = "x-chunk-count";
pub const FAILED_CHUNKS_HEADER: &str = "x-failed-chunks";
pub const DURATION_HEADER: &str = "x-duration-ms";

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub progress_percentage: f64,
}

/// Accept a conversion request and run it in the background.
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConvertRequest>,
) -> AppResult<Response> {
    let snapshot = state.service.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "job_id": snapshot.job_id,
            "chunks_total": snapshot.chunks_total,
            "status": snapshot.status,
        })),
    )
        .into_response())
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<JobStatusResponse>> {
    let snapshot = state.service.snapshot(job_id).await?;
    let progress_percentage = snapshot.progress_percentage();

    Ok(Json(JobStatusResponse {
        snapshot,
        progress_percentage,
    }))
}

/// Hand out the assembled audio of a finished job. The job is evicted.
pub async fn get_audio(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Response> {
    let artifact = state.service.collect(job_id).await?;
    let metadata = &artifact.metadata;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(metadata.mime_type),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(artifact.bytes.len()),
    );
    if let Ok(disposition) = HeaderValue::from_str(&format!(
        "attachment; filename=\"{job_id}.{}\"",
        metadata.format.extension()
    )) {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }
    headers.insert(
        HeaderName::from_static(CHUNK_COUNT_HEADER),
        HeaderValue::from(metadata.chunk_count),
    );
    headers.insert(
        HeaderName::from_static(DURATION_HEADER),
        HeaderValue::from(metadata.total_duration_ms),
    );
    let failed = metadata
        .failed_chunk_indices
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",");
    if let Ok(value) = HeaderValue::from_str(&failed) {
        headers.insert(HeaderName::from_static(FAILED_CHUNKS_HEADER), value);
    }

    info!(
        job_id = %job_id,
        bytes = artifact.bytes.len(),
        chunks = metadata.chunk_count,
        failed = metadata.failed_chunk_indices.len(),
        "Serving converted audio"
    );

    Ok((StatusCode::OK, headers, artifact.bytes).into_response())
}

/// Cancel a running job or discard a finished one.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> AppResult<Json<Value>> {
    let (snapshot, action) = state.service.cancel(job_id).await?;

    Ok(Json(json!({
        "job_id": snapshot.job_id,
        "status": snapshot.status,
        "action": action,
        "cancelled": action == CancelAction::Cancelled,
        "discarded": action == CancelAction::Discarded,
    })))
}

pub async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.service.provider_catalog().await)
}
