//! yt-dlp subprocess adapter
//!
//! Probes run `-J` and parse the info JSON; fetches stream `--newline`
//! progress lines from stdout while stderr is collected for error
//! classification after exit.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ExtractorConfig;
use crate::model::{MediaInfo, Quality, is_playlist_url};

use super::profile::{FetchSpec, format_spec};
use super::{ExtractError, FetchedFile, MediaExtractor, PlaylistEntry, ProbeOutcome, ProgressFn};

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\]\s+(\d+(?:\.\d+)?)%").expect("progress regex"));

/// Lines announcing where the tool is writing / has merged the output
static DESTINATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:\[download\] Destination: (.+)|\[Merger\] Merging formats into "(.+)"|\[ExtractAudio\] Destination: (.+)|\[download\] (.+) has already been downloaded)"#,
    )
    .expect("destination regex")
});

pub struct YtDlpExtractor {
    config: ExtractorConfig,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.ytdlp_bin);
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Map tool stderr to the typed error taxonomy. This is the boundary:
    /// text matching is confined here.
    fn classify(stderr: &str) -> ExtractError {
        let lower = stderr.to_lowercase();
        let summary = stderr
            .lines()
            .rev()
            .find(|l| l.contains("ERROR"))
            .unwrap_or_else(|| stderr.lines().last().unwrap_or("unknown failure"))
            .trim()
            .to_string();

        if lower.contains("video unavailable")
            || lower.contains("does not exist")
            || lower.contains("not found")
            || lower.contains("404")
            || lower.contains("has been removed")
        {
            ExtractError::NotFound(summary)
        } else if lower.contains("sign in")
            || lower.contains("login required")
            || lower.contains("private video")
            || lower.contains("cookies")
            || lower.contains("authentication")
        {
            ExtractError::AuthRequired(summary)
        } else if lower.contains("is live") || lower.contains("premieres in") {
            ExtractError::Unplayable(summary)
        } else {
            ExtractError::Transient(summary)
        }
    }

    fn parse_media_info(info: &Value) -> MediaInfo {
        MediaInfo {
            provider_id: info["id"].as_str().map(String::from),
            title: info["title"].as_str().map(String::from),
            duration_secs: info["duration"].as_f64().map(|d| d as u64),
            author: info["uploader"].as_str().map(String::from),
            view_count: info["view_count"].as_u64(),
            description: info["description"]
                .as_str()
                .map(|d| d.chars().take(2000).collect()),
            thumbnail_url: info["thumbnail"].as_str().map(String::from),
        }
    }

    fn parse_probe(info: &Value) -> ProbeOutcome {
        let is_playlist = info["_type"].as_str() == Some("playlist") || info["entries"].is_array();
        if is_playlist {
            let entries = info["entries"]
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|e| {
                            let provider_id = e["id"].as_str()?.to_string();
                            Some(PlaylistEntry {
                                provider_id,
                                title: e["title"].as_str().map(String::from),
                                duration_secs: e["duration"].as_f64().unwrap_or(0.0) as u64,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            ProbeOutcome::Playlist {
                provider_id: info["id"].as_str().map(String::from),
                title: info["title"].as_str().map(String::from),
                entries,
            }
        } else {
            ProbeOutcome::Media(Self::parse_media_info(info))
        }
    }

    fn fetch_args(&self, spec: &FetchSpec) -> Vec<String> {
        let template = spec
            .dest_dir
            .join("%(title)s [%(id)s].%(ext)s")
            .to_string_lossy()
            .into_owned();

        let mut args = vec![
            "-o".to_string(),
            template,
            "--newline".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--continue".to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_secs.to_string(),
            "--fragment-retries".to_string(),
            self.config.fragment_retries.to_string(),
            // The engine owns attempt-level retries; keep the tool's own
            // whole-download retry loop out of the way.
            "--retries".to_string(),
            "1".to_string(),
        ];

        if spec.quality.is_audio() {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(spec.container.extension().to_string());
            if spec.quality == Quality::AudioMp3 {
                args.push("--audio-quality".to_string());
                args.push("192K".to_string());
            }
        } else {
            args.push("-f".to_string());
            args.push(format_spec(spec.quality).to_string());
            args.push("--merge-output-format".to_string());
            args.push(spec.container.extension().to_string());
        }

        if let Some(proxy) = &spec.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        args.push(spec.url.clone());
        args
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn probe(&self, url: &str, proxy: Option<&str>) -> Result<ProbeOutcome, ExtractError> {
        let mut cmd = self.base_command();
        cmd.arg("-J").arg("--no-warnings");
        if is_playlist_url(url) {
            cmd.arg("--flat-playlist");
        }
        if let Some(proxy) = proxy {
            cmd.arg("--proxy").arg(proxy);
        }
        cmd.arg(url);

        let output = cmd
            .output()
            .await
            .map_err(|e| ExtractError::Tooling(format!("{}: {e}", self.config.ytdlp_bin)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::classify(&stderr));
        }

        let info: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| ExtractError::Transient(format!("probe output was not JSON: {e}")))?;
        Ok(Self::parse_probe(&info))
    }

    async fn fetch(
        &self,
        spec: &FetchSpec,
        mut progress: ProgressFn,
    ) -> Result<FetchedFile, ExtractError> {
        let mut cmd = self.base_command();
        cmd.args(self.fetch_args(spec));

        debug!(url = %spec.url, quality = spec.quality.as_str(), "Spawning extractor");
        let mut child = cmd
            .spawn()
            .map_err(|e| ExtractError::Tooling(format!("{}: {e}", self.config.ytdlp_bin)))?;

        let stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        // Collect stderr concurrently so a chatty tool cannot deadlock on a
        // full pipe while we read stdout.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut dest_path: Option<PathBuf> = None;
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(caps) = PROGRESS_RE.captures(&line) {
                if let Ok(pct) = caps[1].parse::<f32>() {
                    progress(pct);
                }
            } else if let Some(caps) = DESTINATION_RE.captures(&line) {
                let path = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| PathBuf::from(m.as_str().trim()));
                if let Some(path) = path {
                    dest_path = Some(path);
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExtractError::Tooling(format!("wait: {e}")))?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(Self::classify(&stderr_text));
        }

        let path = dest_path
            .filter(|p| p.exists())
            .or_else(|| newest_media_file(&spec.dest_dir))
            .ok_or_else(|| {
                ExtractError::Transient("extractor exited 0 but produced no output file".into())
            })?;

        let info = match self.probe(&spec.url, spec.proxy.as_deref()).await {
            Ok(ProbeOutcome::Media(info)) => info,
            Ok(ProbeOutcome::Playlist { .. }) => MediaInfo::default(),
            Err(e) => {
                warn!(url = %spec.url, error = %e, "Post-fetch metadata probe failed");
                MediaInfo::default()
            }
        };

        Ok(FetchedFile { path, info })
    }
}

/// Fallback when no destination line was captured: the most recently
/// modified non-partial file in the destination directory.
fn newest_media_file(dir: &std::path::Path) -> Option<PathBuf> {
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = path.file_name()?.to_string_lossy().into_owned();
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.ends_with(".temp") {
            continue;
        }
        let mtime = entry.metadata().ok()?.modified().ok()?;
        if best.as_ref().is_none_or(|(t, _)| mtime > *t) {
            best = Some((mtime, path));
        }
    }
    best.map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classify_not_found() {
        let err = YtDlpExtractor::classify("ERROR: [youtube] abc: Video unavailable");
        assert!(matches!(err, ExtractError::NotFound(_)));
        assert!(!err.retriable());
    }

    #[test]
    fn classify_auth() {
        let err = YtDlpExtractor::classify(
            "ERROR: [youtube] abc: Sign in to confirm your age. This video may be inappropriate",
        );
        assert!(matches!(err, ExtractError::AuthRequired(_)));
    }

    #[test]
    fn classify_live() {
        let err = YtDlpExtractor::classify("ERROR: [youtube] abc: This video is live");
        assert!(matches!(err, ExtractError::Unplayable(_)));
    }

    #[test]
    fn classify_defaults_to_transient() {
        let err = YtDlpExtractor::classify("ERROR: unable to download video data: timed out");
        assert!(matches!(err, ExtractError::Transient(_)));
        assert!(err.retriable());
    }

    #[test]
    fn progress_line_parsing() {
        let caps = PROGRESS_RE
            .captures("[download]  45.2% of 120.00MiB at 5.00MiB/s ETA 00:13")
            .unwrap();
        assert_eq!(&caps[1], "45.2");
        assert!(PROGRESS_RE.captures("[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn destination_line_parsing() {
        let caps = DESTINATION_RE
            .captures("[download] Destination: /tmp/My Video [abc123].mp4")
            .unwrap();
        assert_eq!(
            caps.iter().skip(1).flatten().next().unwrap().as_str(),
            "/tmp/My Video [abc123].mp4"
        );

        let caps = DESTINATION_RE
            .captures(r#"[Merger] Merging formats into "/tmp/My Video [abc123].mp4""#)
            .unwrap();
        assert_eq!(
            caps.iter().skip(1).flatten().next().unwrap().as_str(),
            "/tmp/My Video [abc123].mp4"
        );
    }

    #[test]
    fn probe_parsing_single() {
        let info = json!({
            "id": "abc123",
            "title": "A Video",
            "duration": 212.0,
            "uploader": "someone",
            "view_count": 12345,
            "thumbnail": "https://i.example/abc.jpg",
        });
        match YtDlpExtractor::parse_probe(&info) {
            ProbeOutcome::Media(m) => {
                assert_eq!(m.provider_id.as_deref(), Some("abc123"));
                assert_eq!(m.duration_secs, Some(212));
                assert_eq!(m.view_count, Some(12345));
            }
            _ => panic!("expected single media"),
        }
    }

    #[test]
    fn probe_parsing_playlist_with_zero_duration_entries() {
        let info = json!({
            "_type": "playlist",
            "id": "PL123",
            "title": "Mix",
            "entries": [
                {"id": "a", "title": "one", "duration": 120.0},
                {"id": "b", "title": "live", "duration": 0.0},
                {"id": "c", "title": "three", "duration": 95.5},
            ],
        });
        match YtDlpExtractor::parse_probe(&info) {
            ProbeOutcome::Playlist { provider_id, entries, .. } => {
                assert_eq!(provider_id.as_deref(), Some("PL123"));
                assert_eq!(entries.len(), 3);
                assert_eq!(entries[1].duration_secs, 0);
            }
            _ => panic!("expected playlist"),
        }
    }

    #[test]
    fn fetch_args_for_video() {
        let extractor = YtDlpExtractor::new(ExtractorConfig::default());
        let spec = FetchSpec::new(
            "https://youtu.be/abc",
            crate::model::Quality::P720,
            crate::model::Container::Mp4,
            "/tmp/dl",
        );
        let args = extractor.fetch_args(&spec);
        assert!(args.contains(&"--merge-output-format".to_string()));
        assert!(args.contains(&"mp4".to_string()));
        assert!(args.iter().any(|a| a.contains("height<=720")));
        assert!(!args.contains(&"-x".to_string()));
    }

    #[test]
    fn fetch_args_for_audio_with_proxy() {
        let extractor = YtDlpExtractor::new(ExtractorConfig::default());
        let spec = FetchSpec::new(
            "https://youtu.be/abc",
            crate::model::Quality::AudioMp3,
            crate::model::Container::Mp3,
            "/tmp/dl",
        )
        .with_proxy(Some("socks5://localhost:1080".into()));
        let args = extractor.fetch_args(&spec);
        assert!(args.contains(&"-x".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"--proxy".to_string()));
        assert!(args.contains(&"socks5://localhost:1080".to_string()));
    }
}
