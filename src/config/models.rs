use crate::humanize::ByteSize;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub transcode: TranscodeConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub reclaim: ReclaimConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP API binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Fjall keyspace directory for the record store
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            store_path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory all artifacts must live under. Paths served to
    /// clients are canonicalized and checked against this root.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    /// Minimum free space required before admitting a download
    #[serde(default = "default_min_free_space")]
    pub min_free_space: ByteSize,
    /// Cache probe thumbnails under <root>/thumbnails
    #[serde(default = "default_true")]
    pub cache_thumbnails: bool,
}

impl StorageConfig {
    pub fn external_media_dir(&self) -> PathBuf {
        self.root.join("external_media")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root.join("thumbnails")
    }

    pub fn channels_dir(&self) -> PathBuf {
        self.root.join("channels")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            min_free_space: default_min_free_space(),
            cache_thumbnails: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    /// Simultaneous downloads
    #[serde(default = "default_downloads")]
    pub downloads: usize,
    /// Simultaneous transcodes (clamped 1..=5 at validation)
    #[serde(default = "default_conversions")]
    pub conversions: usize,
    /// Simultaneous fetches inside one channel session (clamped 1..=10)
    #[serde(default = "default_channel_batch")]
    pub channel_batch: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            downloads: default_downloads(),
            conversions: default_conversions(),
            channel_batch: default_channel_batch(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts per acquisition before the job errors out
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second acquisition attempt (doubles afterwards)
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Ceiling on the exponential inter-attempt delay
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
    /// Attempts per channel item inside a batch
    #[serde(default = "default_channel_attempts")]
    pub channel_attempts: u32,
    /// Starting delay for the channel batch backoff (doubles each attempt)
    #[serde(default = "default_channel_base_delay_secs")]
    pub channel_base_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
            channel_attempts: default_channel_attempts(),
            channel_base_delay_secs: default_channel_base_delay_secs(),
        }
    }
}

/// Progress persistence cadence. Updates are dropped unless the interval
/// or delta threshold is crossed (or the download is nearly finished).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_progress_interval_secs")]
    pub min_interval_secs: u64,
    #[serde(default = "default_progress_delta_pct")]
    pub min_delta_pct: f32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_progress_interval_secs(),
            min_delta_pct: default_progress_delta_pct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeConfig {
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    /// Stream-copy remux is near-instant; keep the bound short
    #[serde(default = "default_remux_timeout_secs")]
    pub remux_timeout_secs: u64,
    /// Full re-encode can legitimately take a long time
    #[serde(default = "default_encode_timeout_secs")]
    pub encode_timeout_secs: u64,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            remux_timeout_secs: default_remux_timeout_secs(),
            encode_timeout_secs: default_encode_timeout_secs(),
            audio_bitrate: default_audio_bitrate(),
            crf: default_crf(),
            preset: default_preset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
    /// Passed through to the extractor's own fragment retry knob
    #[serde(default = "default_fragment_retries")]
    pub fragment_retries: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            ytdlp_bin: default_ytdlp_bin(),
            socket_timeout_secs: default_socket_timeout_secs(),
            fragment_retries: default_fragment_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReclaimConfig {
    /// Jobs active but untouched for longer than this are considered orphaned
    #[serde(default = "default_reclaim_threshold_mins")]
    pub threshold_minutes: u64,
}

impl Default for ReclaimConfig {
    fn default() -> Self {
        Self {
            threshold_minutes: default_reclaim_threshold_mins(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().expect("default bind addr")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/store")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/media")
}

fn default_min_free_space() -> ByteSize {
    ByteSize(500 * 1024 * 1024)
}

fn default_true() -> bool {
    true
}

fn default_downloads() -> usize {
    3
}

fn default_conversions() -> usize {
    2
}

fn default_channel_batch() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    4
}

fn default_backoff_cap_secs() -> u64 {
    30
}

fn default_channel_attempts() -> u32 {
    3
}

fn default_channel_base_delay_secs() -> u64 {
    5
}

fn default_progress_interval_secs() -> u64 {
    3
}

fn default_progress_delta_pct() -> f32 {
    5.0
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

fn default_remux_timeout_secs() -> u64 {
    600
}

fn default_encode_timeout_secs() -> u64 {
    3600
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_crf() -> u32 {
    23
}

fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_socket_timeout_secs() -> u64 {
    30
}

fn default_fragment_retries() -> u32 {
    5
}

fn default_reclaim_threshold_mins() -> u64 {
    30
}
