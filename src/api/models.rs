//! API request/response models
//!
//! Jobs are exposed as [`JobView`] snapshots: the stored record plus the
//! derived display fields (duration, size, speed) clients render as-is.
//! Bulk endpoints acknowledge immediately with accepted/skipped counts;
//! completion arrives through the notification sink.

use serde::{Deserialize, Serialize};

use crate::humanize::{ByteSize, format_duration, format_speed};
use crate::model::{
    ChannelItem, ChannelItemState, ChannelScanState, Container, ExternalMediaState, Job, JobState,
    MediaKind, Quality,
};

#[derive(Debug, Deserialize, Clone)]
pub struct CreateJobRequest {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub container: Container,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub auto_retry: Option<bool>,
    #[serde(default)]
    pub use_proxy: bool,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobView {
    pub id: String,
    pub reference: String,
    pub name: Option<String>,
    pub url: String,
    pub quality: Quality,
    pub container: Container,
    pub state: JobState,
    pub progress: f32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    pub file_name: Option<String>,
    pub file_size_bytes: u64,
    pub file_size_display: String,
    pub file_exists: bool,
    pub duration_display: String,
    pub speed_display: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail_url: Option<String>,
    pub playlist_count: Option<u32>,
    pub parent_id: Option<String>,
    pub tags: Vec<String>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        let file_exists = job
            .file_path
            .as_deref()
            .map(|p| std::path::Path::new(p).exists())
            .unwrap_or(false);
        Self {
            reference: job.reference,
            name: job.name,
            url: job.url,
            quality: job.quality,
            container: job.container,
            state: job.state,
            progress: job.progress,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            error_message: job.error_message,
            last_error_at: job.last_error_at,
            file_name: job.file_name,
            file_size_bytes: job.file_size_bytes,
            file_size_display: if job.file_size_bytes > 0 {
                ByteSize(job.file_size_bytes).to_human_readable()
            } else {
                "-".to_string()
            },
            file_exists,
            duration_display: format_duration(job.media.duration_secs.unwrap_or(0)),
            speed_display: format_speed(job.file_size_bytes, job.download_secs),
            title: job.media.title,
            author: job.media.author,
            thumbnail_url: job.media.thumbnail_url,
            playlist_count: job.playlist.as_ref().map(|p| p.count),
            parent_id: job.parent_id,
            tags: job.tags,
            created_at: job.created_at,
            updated_at: job.updated_at,
            id: job.id,
        }
    }
}

/// Reduced snapshot for frequent polling
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobStatusView {
    pub id: String,
    pub state: JobState,
    pub progress: f32,
    pub name: Option<String>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl From<Job> for JobStatusView {
    fn from(job: Job) -> Self {
        Self {
            state: job.state,
            progress: job.progress,
            name: job.name.or(job.media.title),
            retry_count: job.retry_count,
            error_message: job.error_message,
            id: job.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IdListRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub outcome: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub skipped: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkAcceptedResponse {
    pub accepted: usize,
    pub skipped: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReclaimResponse {
    pub jobs_reset: usize,
    pub items_reset: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub total: usize,
    pub done: usize,
    pub errors: usize,
    pub pending: usize,
    pub downloading: usize,
    pub drafts: usize,
    pub cancelled: usize,
    pub success_rate: f32,
    pub total_size_bytes: u64,
    pub total_size_display: String,
    pub active: Vec<JobStatusView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExternalMediaView {
    pub id: String,
    pub reference: String,
    pub name: String,
    pub kind: MediaKind,
    pub state: ExternalMediaState,
    pub file_name: Option<String>,
    pub file_size_bytes: u64,
}

impl From<crate::model::ExternalMedia> for ExternalMediaView {
    fn from(media: crate::model::ExternalMedia) -> Self {
        Self {
            reference: media.reference,
            name: media.name,
            kind: media.kind,
            state: media.state,
            file_name: media.file_name,
            file_size_bytes: media.file_size_bytes,
            id: media.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateScanRequest {
    pub identifier: String,
    #[serde(default = "default_scan_limit")]
    pub limit: u32,
}

fn default_scan_limit() -> u32 {
    200
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanView {
    pub id: String,
    pub identifier: String,
    pub state: ChannelScanState,
    pub item_count: u32,
    pub error_message: Option<String>,
}

impl From<crate::model::ChannelScan> for ScanView {
    fn from(scan: crate::model::ChannelScan) -> Self {
        Self {
            identifier: scan.identifier,
            state: scan.state,
            item_count: scan.item_count,
            error_message: scan.error_message,
            id: scan.id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelItemView {
    pub id: String,
    pub message_id: i64,
    pub caption: Option<String>,
    pub state: ChannelItemState,
    pub progress: f32,
    pub file_size_bytes: u64,
    pub error_message: Option<String>,
}

impl From<ChannelItem> for ChannelItemView {
    fn from(item: ChannelItem) -> Self {
        Self {
            message_id: item.message_id,
            caption: item.caption,
            state: item.state,
            progress: item.progress,
            file_size_bytes: item.file_size_bytes,
            error_message: item.error_message,
            id: item.id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
