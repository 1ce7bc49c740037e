//! Extraction client adapter
//!
//! Wraps the external extraction tool behind the [`MediaExtractor`] trait.
//! The adapter is the ONLY place allowed to interpret tool output (exit
//! codes, stderr text); everything past this boundary sees the typed
//! [`ExtractError`] kinds and decides retriability from the enum, never
//! from message text.

mod profile;
mod ytdlp;

pub use profile::{FetchSpec, format_spec};
pub use ytdlp::YtDlpExtractor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::MediaInfo;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The source does not exist or was removed
    #[error("source not found: {0}")]
    NotFound(String),

    /// The source requires credentials we do not have
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Live/zero-duration/unsupported source
    #[error("source is not playable: {0}")]
    Unplayable(String),

    /// Network blip, rate limiting, truncated fragment — worth retrying
    #[error("transient extraction failure: {0}")]
    Transient(String),

    /// The extraction tool itself is missing or broken
    #[error("extraction tooling unavailable: {0}")]
    Tooling(String),
}

impl ExtractError {
    pub fn retriable(&self) -> bool {
        matches!(self, ExtractError::Transient(_))
    }
}

/// A flat playlist entry from a probe (no download)
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistEntry {
    pub provider_id: String,
    pub title: Option<String>,
    pub duration_secs: u64,
}

/// Probe result: either a single media item or a playlist listing
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Media(MediaInfo),
    Playlist {
        provider_id: Option<String>,
        title: Option<String>,
        entries: Vec<PlaylistEntry>,
    },
}

/// A finished acquisition
#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub info: MediaInfo,
}

/// Progress callback, called with 0..=100 percentages
pub type ProgressFn = Box<dyn FnMut(f32) + Send>;

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// Fetch metadata without downloading
    async fn probe(&self, url: &str, proxy: Option<&str>) -> Result<ProbeOutcome, ExtractError>;

    /// Download one media item per the fetch spec, reporting progress
    async fn fetch(
        &self,
        spec: &FetchSpec,
        progress: ProgressFn,
    ) -> Result<FetchedFile, ExtractError>;
}

/// Download a thumbnail image, best-effort companion to a finished job
pub async fn fetch_thumbnail(url: &str) -> Result<bytes::Bytes, ExtractError> {
    let response = reqwest::get(url)
        .await
        .map_err(|e| ExtractError::Transient(format!("thumbnail fetch: {e}")))?;
    if !response.status().is_success() {
        return Err(ExtractError::Transient(format!(
            "thumbnail fetch: HTTP {}",
            response.status()
        )));
    }
    response
        .bytes()
        .await
        .map_err(|e| ExtractError::Transient(format!("thumbnail body: {e}")))
}

/// Sweep partial/temporary download leftovers from a destination directory
pub fn cleanup_partial_files(dest: &Path) {
    const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

    let entries = match std::fs::read_dir(dest) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::info!(path = %path.display(), "Removed partial file"),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file")
                }
            }
        }
    }
}
