//! Transcoding / remux pipeline
//!
//! Normalizes containers browsers cannot play. Strategy: stream-copy the
//! video and re-encode only the audio to AAC first (near-instant); if that
//! remux fails, fall back to a full re-encode. Opus/Vorbis audio inside
//! MP4 plays silently in browsers, which is why the audio track is always
//! re-encoded — and why the same code path doubles as the "repair audio"
//! fix for already-converted files.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::config::TranscodeConfig;
use crate::model::MediaKind;

/// Containers browsers play natively, per media kind
pub const PLAYABLE_VIDEO_CONTAINERS: &[&str] = &["mp4", "webm", "ogg", "ogv"];
pub const PLAYABLE_AUDIO_CONTAINERS: &[&str] =
    &["mp3", "wav", "m4a", "ogg", "aac", "flac", "opus"];

/// Whether a file extension needs no conversion for in-browser playback
pub fn is_browser_playable(ext: &str, kind: MediaKind) -> bool {
    let ext = ext.to_ascii_lowercase();
    match kind {
        MediaKind::Video => PLAYABLE_VIDEO_CONTAINERS.contains(&ext.as_str()),
        MediaKind::Audio => PLAYABLE_AUDIO_CONTAINERS.contains(&ext.as_str()),
    }
}

/// Extension of a path, lowercased, without the dot
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("encoder '{bin}' could not be spawned: {source}")]
    Spawn {
        bin: String,
        source: std::io::Error,
    },

    #[error("encoder timed out after {0:?}")]
    Timeout(Duration),

    #[error("encoder exited with failure: {0}")]
    ExitFailure(String),

    #[error("output file is empty or missing: {0}")]
    EmptyOutput(PathBuf),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Transcoder {
    config: TranscodeConfig,
}

impl Transcoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// Whether the encoder binary is runnable on this host
    pub async fn is_available(&self) -> bool {
        Command::new(&self.config.ffmpeg_bin)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Convert `source` into a playable MP4 next to it.
    ///
    /// On success the superseded source file is removed and the new path
    /// returned. On any failure partial output is removed and the error
    /// propagated; a zero-byte artifact is never left behind.
    pub async fn remux_to_mp4(&self, source: &Path) -> Result<PathBuf, TranscodeError> {
        let mp4_path = source.with_extension("mp4");
        let ext = extension_of(source);
        if ext == "mp4" {
            return Ok(source.to_path_buf());
        }

        info!(source = %source.display(), "Remuxing to MP4 (video copy, audio AAC)");
        let remux = self
            .run_ffmpeg(
                source,
                &mp4_path,
                &["-c:v", "copy"],
                Duration::from_secs(self.config.remux_timeout_secs),
            )
            .await;

        if let Err(e) = remux {
            info!(source = %source.display(), error = %e, "Remux failed, re-encoding fully");
            remove_if_exists(&mp4_path);
            let video_args = [
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                self.config.preset.clone(),
                "-crf".to_string(),
                self.config.crf.to_string(),
            ];
            let video_args: Vec<&str> = video_args.iter().map(String::as_str).collect();
            if let Err(e) = self
                .run_ffmpeg(
                    source,
                    &mp4_path,
                    &video_args,
                    Duration::from_secs(self.config.encode_timeout_secs),
                )
                .await
            {
                remove_if_exists(&mp4_path);
                return Err(e);
            }
        }

        validate_output(&mp4_path)?;

        if source != mp4_path {
            if let Err(e) = std::fs::remove_file(source) {
                warn!(source = %source.display(), error = %e, "Could not remove superseded file");
            }
        }
        info!(path = %mp4_path.display(), "Conversion complete");
        Ok(mp4_path)
    }

    /// Re-encode only the audio track of an MP4 in place (silent-playback
    /// fix). Writes to a sibling temp file, then atomically replaces the
    /// original. Returns the new size in bytes.
    pub async fn repair_audio(&self, path: &Path) -> Result<u64, TranscodeError> {
        let tmp_path = path.with_extension("fixing.mp4");

        info!(path = %path.display(), "Repairing audio track (AAC)");
        let copy = self
            .run_ffmpeg(
                path,
                &tmp_path,
                &["-c:v", "copy"],
                Duration::from_secs(self.config.remux_timeout_secs),
            )
            .await;

        if let Err(e) = copy {
            info!(path = %path.display(), error = %e, "Video copy failed, re-encoding fully");
            remove_if_exists(&tmp_path);
            let video_args = [
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                self.config.preset.clone(),
                "-crf".to_string(),
                self.config.crf.to_string(),
            ];
            let video_args: Vec<&str> = video_args.iter().map(String::as_str).collect();
            if let Err(e) = self
                .run_ffmpeg(
                    path,
                    &tmp_path,
                    &video_args,
                    Duration::from_secs(self.config.encode_timeout_secs),
                )
                .await
            {
                remove_if_exists(&tmp_path);
                return Err(e);
            }
        }

        validate_output(&tmp_path)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(std::fs::metadata(path)?.len())
    }

    /// Codec name of the first audio stream, via ffprobe
    pub async fn audio_codec(&self, path: &Path) -> Result<Option<String>, TranscodeError> {
        let output = Command::new(&self.config.ffprobe_bin)
            .args(["-v", "quiet", "-select_streams", "a:0"])
            .args(["-show_entries", "stream=codec_name", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                bin: self.config.ffprobe_bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| TranscodeError::Probe(e.to_string()))?;
        Ok(parsed["streams"][0]["codec_name"]
            .as_str()
            .map(|c| c.to_ascii_lowercase()))
    }

    /// Command piping a live fragmented-MP4 transcode to stdout, for the
    /// streaming gateway. The caller owns the child process.
    pub fn live_transcode_command(&self, source: &Path) -> Command {
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.arg("-i")
            .arg(source)
            .args(["-f", "mp4", "-movflags", "frag_keyframe+empty_moov"])
            .args(["-c:v", "libx264", "-preset", self.config.preset.as_str()])
            .args(["-crf", &self.config.crf.to_string()])
            .args(["-c:a", "aac", "-b:a", self.config.audio_bitrate.as_str()])
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// One bounded ffmpeg run: `ffmpeg -i <src> <video args> -c:a aac
    /// -b:a <rate> -movflags +faststart -y <dst>`
    async fn run_ffmpeg(
        &self,
        source: &Path,
        dest: &Path,
        video_args: &[&str],
        timeout: Duration,
    ) -> Result<(), TranscodeError> {
        let mut cmd = Command::new(&self.config.ffmpeg_bin);
        cmd.arg("-i")
            .arg(source)
            .args(video_args)
            .args(["-c:a", "aac", "-b:a", self.config.audio_bitrate.as_str()])
            .args(["-movflags", "+faststart", "-y"])
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| TranscodeError::Spawn {
            bin: self.config.ffmpeg_bin.clone(),
            source,
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            // Dropping the in-flight future kills the child (kill_on_drop)
            Err(_) => {
                error!(dest = %dest.display(), "Encoder timed out");
                return Err(TranscodeError::Timeout(timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .chars()
                .skip(stderr.chars().count().saturating_sub(300))
                .collect();
            return Err(TranscodeError::ExitFailure(tail.trim().to_string()));
        }
        Ok(())
    }
}

fn validate_output(path: &Path) -> Result<(), TranscodeError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => {
            remove_if_exists(path);
            Err(TranscodeError::EmptyOutput(path.to_path_buf()))
        }
    }
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Could not remove partial output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playability_per_kind() {
        assert!(is_browser_playable("mp4", MediaKind::Video));
        assert!(is_browser_playable("WEBM", MediaKind::Video));
        assert!(!is_browser_playable("mkv", MediaKind::Video));
        assert!(!is_browser_playable("avi", MediaKind::Video));

        assert!(is_browser_playable("mp3", MediaKind::Audio));
        assert!(is_browser_playable("flac", MediaKind::Audio));
        assert!(!is_browser_playable("wma", MediaKind::Audio));
        // mp3 is not a video container
        assert!(!is_browser_playable("mp3", MediaKind::Video));
    }

    #[test]
    fn extension_extraction() {
        assert_eq!(extension_of(Path::new("/a/b/video.MKV")), "mkv");
        assert_eq!(extension_of(Path::new("/a/b/noext")), "");
    }

    #[test]
    fn validate_output_rejects_empty_and_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            validate_output(&empty),
            Err(TranscodeError::EmptyOutput(_))
        ));
        assert!(!empty.exists());

        let full = tmp.path().join("full.mp4");
        std::fs::write(&full, b"data").unwrap();
        assert!(validate_output(&full).is_ok());
        assert!(full.exists());
    }

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let transcoder = Transcoder::new(TranscodeConfig {
            ffmpeg_bin: "definitely-not-ffmpeg-bin".into(),
            ..TranscodeConfig::default()
        });
        assert!(!transcoder.is_available().await);
    }

    #[tokio::test]
    async fn missing_binary_spawn_error() {
        let transcoder = Transcoder::new(TranscodeConfig {
            ffmpeg_bin: "definitely-not-ffmpeg-bin".into(),
            ffprobe_bin: "definitely-not-ffprobe-bin".into(),
            ..TranscodeConfig::default()
        });
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("in.mkv");
        std::fs::write(&src, b"x").unwrap();

        let err = transcoder.remux_to_mp4(&src).await.unwrap_err();
        assert!(matches!(err, TranscodeError::Spawn { .. }));
        // Source untouched on failure
        assert!(src.exists());
    }
}
