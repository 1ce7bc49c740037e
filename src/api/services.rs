use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use tracing::info;

use super::error::ApiError;
use super::models::{
    BulkAcceptedResponse, ChannelItemView, CreateJobRequest, CreateScanRequest, DashboardResponse,
    ExternalMediaView, HealthResponse, IdListRequest, JobStatusView, JobView, ReclaimResponse,
    ScanView, StartResponse,
};
use super::state::AppState;
use crate::engine::{NewJob, StartOutcome};
use crate::humanize::ByteSize;
use crate::media::sanitize_filename;
use crate::model::{ChannelScan, JobState, parse_channel_identifier};

// ── Job lifecycle ───────────────────────────────────────────────────────

pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.create_job(NewJob {
        url: request.url,
        name: request.name,
        quality: request.quality,
        container: request.container,
        max_retries: request.max_retries,
        auto_retry: request.auto_retry,
        use_proxy: request.use_proxy,
        proxy_url: request.proxy_url,
        tags: request.tags,
    })?;
    Ok((axum::http::StatusCode::CREATED, Json(JobView::from(job))))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;
    Ok(Json(JobView::from(job)))
}

/// Fetch metadata without downloading
pub async fn probe_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.probe_job(&job_id).await?;
    Ok(Json(JobView::from(job)))
}

pub async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.start_job(&job_id).await?;
    let response = match outcome {
        StartOutcome::Queued => StartResponse {
            outcome: "queued".into(),
            children: Vec::new(),
            skipped: 0,
        },
        StartOutcome::Expanded { children, skipped } => StartResponse {
            outcome: "expanded".into(),
            children,
            skipped,
        },
    };
    Ok((axum::http::StatusCode::ACCEPTED, Json(response)))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.cancel_job(&job_id)?;
    Ok(Json(JobView::from(job)))
}

pub async fn reset_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.reset_job(&job_id)?;
    Ok(Json(JobView::from(job)))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.retry_job(&job_id).await?;
    let job = state
        .store
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;
    Ok((axum::http::StatusCode::ACCEPTED, Json(JobView::from(job))))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_job(&job_id)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ── Status queries ──────────────────────────────────────────────────────

pub async fn bulk_status(
    State(state): State<AppState>,
    Json(request): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut out = Vec::with_capacity(request.ids.len());
    for id in &request.ids {
        if let Some(job) = state.store.get_job(id)? {
            out.push(JobStatusView::from(job));
        }
    }
    Ok(Json(out))
}

pub async fn active_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.store.jobs_where(|j| j.state.is_active())?;
    let views: Vec<JobStatusView> = jobs.into_iter().map(JobStatusView::from).collect();
    Ok(Json(views))
}

pub async fn dashboard(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.store.jobs_where(|_| true)?;
    let total = jobs.len();
    let count = |s: JobState| jobs.iter().filter(|j| j.state == s).count();
    let done = count(JobState::Done);
    let total_size_bytes: u64 = jobs
        .iter()
        .filter(|j| j.state == JobState::Done)
        .map(|j| j.file_size_bytes)
        .sum();
    let active: Vec<JobStatusView> = jobs
        .iter()
        .filter(|j| j.state.is_active())
        .cloned()
        .map(JobStatusView::from)
        .collect();

    Ok(Json(DashboardResponse {
        total,
        done,
        errors: count(JobState::Error),
        pending: count(JobState::Pending),
        downloading: count(JobState::Downloading),
        drafts: count(JobState::Draft),
        cancelled: count(JobState::Cancelled),
        success_rate: if total > 0 {
            (done as f32 / total as f32 * 1000.0).round() / 10.0
        } else {
            0.0
        },
        total_size_bytes,
        total_size_display: ByteSize(total_size_bytes).to_human_readable(),
        active,
    }))
}

// ── Bulk operations ─────────────────────────────────────────────────────

pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (accepted, skipped) = state.engine.start_many(&request.ids).await;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(BulkAcceptedResponse { accepted, skipped }),
    ))
}

/// Queue MP4 conversions; completion arrives via the notification sink
pub async fn convert_batch(
    State(state): State<AppState>,
    Json(request): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (accepted, skipped) = state.engine.bulk_convert(request.ids).await?;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(BulkAcceptedResponse { accepted, skipped }),
    ))
}

/// Queue audio-track repairs (silent playback fix)
pub async fn repair_audio_batch(
    State(state): State<AppState>,
    Json(request): Json<IdListRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (accepted, skipped) = state.engine.bulk_repair(request.ids).await?;
    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(BulkAcceptedResponse { accepted, skipped }),
    ))
}

// ── Maintenance ─────────────────────────────────────────────────────────

/// One orphan-reclaim sweep; wired to an external scheduler
pub async fn reclaim(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.engine.reclaim()?;
    Ok(Json(ReclaimResponse {
        jobs_reset: report.jobs_reset,
        items_reset: report.items_reset,
    }))
}

// ── External media ──────────────────────────────────────────────────────

/// Accepts `video/*`, `audio/*` or `application/octet-stream` uploads;
/// an absent Content-Type falls back to extension-based classification.
fn validate_upload_content_type(headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(content_type) = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return Ok(());
    };
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid Content-Type: {content_type}")))?;
    match (media_type.type_(), media_type.subtype().as_str()) {
        (mime::VIDEO, _) | (mime::AUDIO, _) => Ok(()),
        (mime::APPLICATION, "octet-stream") => Ok(()),
        _ => Err(ApiError::InvalidPayload(format!(
            "Content-Type must be video/*, audio/* or application/octet-stream, got {media_type}"
        ))),
    }
}

/// Raw-body upload; filename and title travel in headers
pub async fn upload_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    validate_upload_content_type(&headers)?;
    let file_name = headers
        .get("X-Media-Filename")
        .and_then(|v| v.to_str().ok())
        .map(sanitize_filename)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::InvalidPayload("X-Media-Filename header is required".into()))?;
    let title = headers
        .get("X-Media-Title")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if body.is_empty() {
        return Err(ApiError::InvalidPayload("upload body is empty".into()));
    }

    let media = state
        .intake
        .save_upload(&title, &file_name, &body, None)
        .await?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(ExternalMediaView::from(media)),
    ))
}

// ── Channels ────────────────────────────────────────────────────────────

pub async fn create_scan(
    State(state): State<AppState>,
    Json(request): Json<CreateScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = parse_channel_identifier(&request.identifier)
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
    let scan = ChannelScan::new(identifier, request.limit.clamp(1, 1000));
    state.store.upsert_scan(&scan)?;
    Ok((
        axum::http::StatusCode::CREATED,
        Json(ScanView::from(scan)),
    ))
}

pub async fn run_scan(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_scan(&scan_id)?
        .ok_or_else(|| ApiError::NotFound(format!("scan {scan_id}")))?;

    let coordinator = state.coordinator.clone();
    let id = scan_id.clone();
    tokio::spawn(async move {
        if let Err(e) = coordinator.scan(&id).await {
            info!(scan_id = %id, error = %e, "Channel scan failed");
        }
    });
    Ok(axum::http::StatusCode::ACCEPTED)
}

pub async fn scan_status(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let scan = state
        .store
        .get_scan(&scan_id)?
        .ok_or_else(|| ApiError::NotFound(format!("scan {scan_id}")))?;
    Ok(Json(ScanView::from(scan)))
}

pub async fn scan_items(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.store.items_where(|i| i.scan_id == scan_id)?;
    let views: Vec<ChannelItemView> = items.into_iter().map(ChannelItemView::from).collect();
    Ok(Json(views))
}

/// Queue every draft/error item of a scan through the single-session
/// batch coordinator
pub async fn download_all(
    State(state): State<AppState>,
    Path(scan_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_scan(&scan_id)?
        .ok_or_else(|| ApiError::NotFound(format!("scan {scan_id}")))?;

    let items = state.store.items_where(|i| {
        i.scan_id == scan_id
            && matches!(
                i.state,
                crate::model::ChannelItemState::Draft | crate::model::ChannelItemState::Error
            )
    })?;
    let total = items.len();
    let ids: Vec<String> = items.into_iter().map(|i| i.id).collect();
    let accepted = state.coordinator.download_batch(ids).await;

    Ok((
        axum::http::StatusCode::ACCEPTED,
        Json(BulkAcceptedResponse {
            accepted,
            skipped: total - accepted,
        }),
    ))
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
