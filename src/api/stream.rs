//! Range-serving & on-the-fly transcode gateway
//!
//! Serves a completed job's artifact. Path containment is re-checked on
//! every request against the configured storage root; a record pointing
//! outside it is rejected no matter what the record claims. Containers a
//! browser cannot play are bridged with a live piped transcode (range
//! support disabled: encoder output has no fixed length), everything else
//! is served with byte-range support.

use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use super::error::ApiError;
use super::state::AppState;
use crate::engine::{PreflightError, resolve_inside_root};
use crate::media::sanitize_filename;
use crate::model::{JobState, MediaKind};
use crate::transcode::{extension_of, is_browser_playable};

/// Content types by extension; everything else falls back to octet-stream
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "ogv" => "video/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "opus" => "audio/opus",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RangeOutcome {
    /// `start..=end`, both in bounds
    Satisfiable { start: u64, end: u64 },
    /// Start at or past the end of the file: 416
    Unsatisfiable,
    /// Absent or unparseable: serve the whole file
    Ignored,
}

/// Evaluate a `Range: bytes=start-end` header against a file size.
/// Only the single-range `bytes=N-` / `bytes=N-M` forms are honored.
pub fn evaluate_range(header: Option<&str>, size: u64) -> RangeOutcome {
    let Some(value) = header else {
        return RangeOutcome::Ignored;
    };
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return RangeOutcome::Ignored;
    };
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return RangeOutcome::Ignored;
    };
    let Ok(start) = start_str.parse::<u64>() else {
        return RangeOutcome::Ignored;
    };
    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }
    let end = if end_str.is_empty() {
        size - 1
    } else {
        match end_str.parse::<u64>() {
            Ok(end) => end.min(size - 1),
            Err(_) => return RangeOutcome::Ignored,
        }
    };
    if end < start {
        return RangeOutcome::Ignored;
    }
    RangeOutcome::Satisfiable { start, end }
}

/// GET /stream/{job_id}
pub async fn stream_job(
    State(state): State<AppState>,
    AxumPath(job_id): AxumPath<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let job = state
        .store
        .get_job(&job_id)?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    if job.state != JobState::Done {
        return Err(ApiError::NotReady(format!(
            "job is '{}', not done",
            job.state.as_str()
        )));
    }
    let raw_path = job
        .file_path
        .as_deref()
        .ok_or_else(|| ApiError::Gone("job has no stored file".into()))?;
    let raw_path = PathBuf::from(raw_path);
    if !raw_path.exists() {
        return Err(ApiError::Gone(format!(
            "file no longer exists: {}",
            raw_path.display()
        )));
    }

    let root = &state.config.storage.root;
    let mut path = contain(root, &raw_path)?;

    // Prefer an already-converted companion over transcoding again
    let kind = if job.quality.is_audio() {
        MediaKind::Audio
    } else {
        MediaKind::Video
    };
    if !is_browser_playable(&extension_of(&path), kind) {
        let companion = path.with_extension("mp4");
        if companion.exists() {
            if let Ok(resolved) = contain(root, &companion) {
                info!(job_id, companion = %resolved.display(), "Serving companion artifact");
                path = resolved;
            }
        }
    }

    let ext = extension_of(&path);
    if !is_browser_playable(&ext, kind) && state.transcoder.is_available().await {
        return live_transcode(&state, &job_id, &path).await;
    }

    let file_name = sanitize_filename(
        job.file_name
            .as_deref()
            .unwrap_or_else(|| path.file_name().map(|n| n.to_str().unwrap_or("media")).unwrap_or("media")),
    );
    serve_file(&state, &path, &ext, &file_name, &headers).await
}

fn contain(root: &Path, candidate: &Path) -> Result<PathBuf, ApiError> {
    resolve_inside_root(root, candidate).map_err(|e| match e {
        PreflightError::PathEscapesRoot { .. } => {
            ApiError::Forbidden("file path is not inside the storage root".into())
        }
        other => ApiError::Internal(other.to_string()),
    })
}

/// Pipe a live encoder straight into the response body: no temp file, no
/// range support (the output has no fixed length or seekability).
async fn live_transcode(
    state: &AppState,
    job_id: &str,
    source: &Path,
) -> Result<Response, ApiError> {
    info!(job_id, source = %source.display(), "Live transcode stream");
    let mut child = state
        .transcoder
        .live_transcode_command(source)
        .spawn()
        .map_err(|e| ApiError::Internal(format!("could not spawn encoder: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::Internal("encoder stdout unavailable".into()))?;

    // Keep the child alive for the duration of the stream; if the client
    // disconnects the pipe closes and the encoder exits on its own.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if !status.success() => {
                warn!(code = status.code().unwrap_or(-1), "Live transcode exited nonzero")
            }
            Err(e) => warn!(error = %e, "Live transcode wait failed"),
            _ => {}
        }
    });

    let body = Body::from_stream(ReaderStream::new(stdout));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::ACCEPT_RANGES, "none")
        .body(body)
        .map_err(|e| ApiError::Internal(e.to_string()))
}

async fn serve_file(
    state: &AppState,
    path: &Path,
    ext: &str,
    file_name: &str,
    headers: &HeaderMap,
) -> Result<Response, ApiError> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();
    if size == 0 {
        return Err(ApiError::Gone("stored file is empty".into()));
    }
    let content_type = content_type_for(ext);
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    match evaluate_range(range_header, size) {
        RangeOutcome::Unsatisfiable => Err(ApiError::RangeNotSatisfiable(size)),
        RangeOutcome::Satisfiable { start, end } => {
            let length = end - start + 1;
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            state.metrics.bytes_served(length);

            Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {start}-{end}/{size}"),
                )
                .header(header::CONTENT_LENGTH, length)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("inline; filename=\"{file_name}\""),
                )
                .body(body)
                .map_err(|e| ApiError::Internal(e.to_string()))
        }
        RangeOutcome::Ignored => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            let body = Body::from_stream(ReaderStream::new(file));
            state.metrics.bytes_served(size);

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, size)
                .header(header::ACCEPT_RANGES, "bytes")
                .header(
                    header::CONTENT_DISPOSITION,
                    format!("inline; filename=\"{file_name}\""),
                )
                .body(body)
                .map_err(|e| ApiError::Internal(e.to_string()))
        }
    }
}
