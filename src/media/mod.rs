//! External media intake
//!
//! Files that enter the library by upload instead of acquisition: checked
//! against the extension allow-list, written under `external_media/` with
//! a collision-proof name, and auto-remuxed when the container is not
//! browser-playable.

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::{PreflightError, ensure_dir_writable};
use crate::model::{
    ExternalMedia, ExternalMediaState, MediaKind, ValidationError, kind_for_extension,
};
use crate::store::{RecordStore, StoreError};
use crate::transcode::{Transcoder, is_browser_playable};

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Strip path components and header-breaking characters from a client
/// filename.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '"' | '\\'))
        .collect();
    let base = Path::new(&cleaned)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if base.is_empty() {
        "upload".to_string()
    } else {
        base
    }
}

#[derive(Clone)]
pub struct MediaIntake {
    config: Arc<Config>,
    store: Arc<RecordStore>,
    transcoder: Arc<Transcoder>,
}

impl MediaIntake {
    pub fn new(
        config: Arc<Config>,
        store: Arc<RecordStore>,
        transcoder: Arc<Transcoder>,
    ) -> Self {
        Self {
            config,
            store,
            transcoder,
        }
    }

    /// Persist an uploaded file and its record. Returns the record in
    /// `Ready` state; conversion of unplayable video containers happens
    /// inline, best-effort.
    pub async fn save_upload(
        &self,
        title: &str,
        file_name: &str,
        bytes: &[u8],
        source_url: Option<String>,
    ) -> Result<ExternalMedia, IntakeError> {
        let safe_name = sanitize_filename(file_name).replace(' ', "_");
        let ext = Path::new(&safe_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let kind = kind_for_extension(&ext)
            .ok_or(ValidationError::UnsupportedExtension(ext.clone()))?;

        let dir = self.config.storage.external_media_dir();
        ensure_dir_writable(&dir)?;

        let unique_name = format!("{}_{}", &Uuid::new_v4().simple().to_string()[..8], safe_name);
        let dest = dir.join(&unique_name);
        std::fs::write(&dest, bytes)?;
        let size = std::fs::metadata(&dest)?.len();

        let mut media = ExternalMedia::new(if title.is_empty() { &safe_name } else { title });
        media.kind = kind;
        media.state = ExternalMediaState::Ready;
        media.file_path = Some(dest.to_string_lossy().into_owned());
        media.file_name = Some(unique_name.clone());
        media.file_size_bytes = size;
        media.source_url = source_url;
        self.store.upsert_external(&media)?;
        info!(media_id = %media.id, file = %dest.display(), size, "External media stored");

        // Auto-convert unplayable video containers so playback works out
        // of the box; a failure keeps the original file usable.
        if kind == MediaKind::Video
            && !is_browser_playable(&ext, MediaKind::Video)
            && self.transcoder.is_available().await
        {
            match self.transcoder.remux_to_mp4(&dest).await {
                Ok(converted) => {
                    let new_size = std::fs::metadata(&converted).map(|m| m.len()).unwrap_or(0);
                    let updated = self.store.update_external(&media.id, |m| {
                        m.file_path = Some(converted.to_string_lossy().into_owned());
                        m.file_name = converted
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned());
                        m.file_size_bytes = new_size;
                    })?;
                    return Ok(updated);
                }
                Err(e) => {
                    warn!(media_id = %media.id, error = %e, "Auto-conversion failed, keeping original");
                }
            }
        }
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn intake() -> (MediaIntake, Arc<RecordStore>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = tmp.path().join("media");
        let store = Arc::new(RecordStore::open(tmp.path().join("store")).unwrap());
        let transcoder = Arc::new(Transcoder::new(crate::config::TranscodeConfig {
            ffmpeg_bin: "missing-ffmpeg-for-tests".into(),
            ..Default::default()
        }));
        (
            MediaIntake::new(Arc::new(config), store.clone(), transcoder),
            store,
            tmp,
        )
    }

    #[test]
    fn sanitize_strips_paths_and_control_chars() {
        assert_eq!(sanitize_filename("video.mp4"), "video.mp4");
        assert_eq!(sanitize_filename("/etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a/b/../c.mp4"), "c.mp4");
        assert_eq!(sanitize_filename("evil\r\nheader.mp4"), "evilheader.mp4");
        assert_eq!(sanitize_filename("\"quoted\".mkv"), "quoted.mkv");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[tokio::test]
    async fn upload_is_stored_with_unique_prefix() {
        let (intake, store, tmp) = intake();
        let media = intake
            .save_upload("My Clip", "my clip.mp4", b"fake-mp4-bytes", None)
            .await
            .unwrap();

        assert_eq!(media.state, ExternalMediaState::Ready);
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.file_size_bytes, 14);

        let file_name = media.file_name.unwrap();
        assert!(file_name.ends_with("_my_clip.mp4"));
        assert!(
            tmp.path()
                .join("media/external_media")
                .join(&file_name)
                .exists()
        );
        assert!(store.get_external(&media.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn audio_extension_classified_as_audio() {
        let (intake, _store, _tmp) = intake();
        let media = intake
            .save_upload("Track", "track.flac", b"flac", None)
            .await
            .unwrap();
        assert_eq!(media.kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn unsupported_extension_rejected_before_write() {
        let (intake, store, tmp) = intake();
        let err = intake
            .save_upload("Nope", "malware.exe", b"mz", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IntakeError::Validation(ValidationError::UnsupportedExtension(_))
        ));
        assert!(store.externals_where(|_| true).unwrap().is_empty());
        assert!(!tmp.path().join("media/external_media").exists() || {
            std::fs::read_dir(tmp.path().join("media/external_media"))
                .map(|mut d| d.next().is_none())
                .unwrap_or(true)
        });
    }

    #[tokio::test]
    async fn mkv_upload_without_encoder_keeps_original() {
        let (intake, _store, _tmp) = intake();
        let media = intake
            .save_upload("Raw", "raw.mkv", b"matroska", None)
            .await
            .unwrap();
        // Encoder unavailable in tests: the mkv stays as-is, still Ready
        assert_eq!(media.state, ExternalMediaState::Ready);
        assert!(media.file_name.unwrap().ends_with("raw.mkv"));
    }
}
