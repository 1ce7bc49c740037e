#![allow(dead_code)]

//! Shared test harness: deterministic mock extractor + app/engine builders

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tempfile::TempDir;

use mediabox::api::state::AppState;
use mediabox::channel::UnconfiguredConnector;
use mediabox::config::Config;
use mediabox::extract::{
    ExtractError, FetchSpec, FetchedFile, MediaExtractor, PlaylistEntry, ProbeOutcome, ProgressFn,
};
use mediabox::model::MediaInfo;
use mediabox::notify::MockSink;
use mediabox::store::RecordStore;

/// What the mock should do on fetch calls
#[derive(Clone)]
pub enum FetchPlan {
    /// Write `size` bytes named `file_name` and succeed
    Succeed { file_name: String, size: usize },
    /// Fail the first `failures` calls with a transient error (leaving a
    /// partial file behind), then succeed
    FlakyThenSucceed { file_name: String, failures: u32 },
    /// Always fail with a transient error, leaving a partial file behind
    AlwaysTransient,
    /// Fail immediately with a non-retriable error
    NotFound,
}

pub struct MockExtractor {
    pub probe_outcome: ProbeOutcome,
    pub plan: FetchPlan,
    pub fetch_calls: AtomicU32,
    pub live_fetches: Arc<AtomicUsize>,
    pub peak_fetches: Arc<AtomicUsize>,
    pub fetch_delay_ms: u64,
}

impl MockExtractor {
    pub fn new(plan: FetchPlan) -> Self {
        Self {
            probe_outcome: ProbeOutcome::Media(MediaInfo {
                provider_id: Some("abc123".into()),
                title: Some("A Test Video".into()),
                duration_secs: Some(212),
                author: Some("someone".into()),
                view_count: Some(1000),
                description: None,
                thumbnail_url: None,
            }),
            plan,
            fetch_calls: AtomicU32::new(0),
            live_fetches: Arc::new(AtomicUsize::new(0)),
            peak_fetches: Arc::new(AtomicUsize::new(0)),
            fetch_delay_ms: 0,
        }
    }

    pub fn with_probe(mut self, outcome: ProbeOutcome) -> Self {
        self.probe_outcome = outcome;
        self
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.fetch_delay_ms = ms;
        self
    }

    pub fn playlist_probe(entries: &[(&str, u64)]) -> ProbeOutcome {
        ProbeOutcome::Playlist {
            provider_id: Some("PL123".into()),
            title: Some("Test Playlist".into()),
            entries: entries
                .iter()
                .map(|(id, duration)| PlaylistEntry {
                    provider_id: id.to_string(),
                    title: Some(format!("entry {id}")),
                    duration_secs: *duration,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl MediaExtractor for MockExtractor {
    async fn probe(&self, _url: &str, _proxy: Option<&str>) -> Result<ProbeOutcome, ExtractError> {
        Ok(self.probe_outcome.clone())
    }

    async fn fetch(
        &self,
        spec: &FetchSpec,
        mut progress: ProgressFn,
    ) -> Result<FetchedFile, ExtractError> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let live = self.live_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_fetches.fetch_max(live, Ordering::SeqCst);
        if self.fetch_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.fetch_delay_ms)).await;
        }

        let result = match &self.plan {
            FetchPlan::Succeed { file_name, size } => {
                progress(10.0);
                progress(50.0);
                progress(100.0);
                let path = spec.dest_dir.join(file_name);
                std::fs::write(&path, vec![0u8; *size])
                    .map_err(|e| ExtractError::Tooling(e.to_string()))?;
                Ok(FetchedFile {
                    path,
                    info: MediaInfo {
                        provider_id: Some("abc123".into()),
                        title: Some("A Test Video".into()),
                        duration_secs: Some(212),
                        author: Some("someone".into()),
                        view_count: Some(1000),
                        description: None,
                        thumbnail_url: None,
                    },
                })
            }
            FetchPlan::FlakyThenSucceed { file_name, failures } => {
                if call <= *failures {
                    let _ = std::fs::write(spec.dest_dir.join("leftover.mp4.part"), b"partial");
                    Err(ExtractError::Transient("simulated network blip".into()))
                } else {
                    progress(100.0);
                    let path = spec.dest_dir.join(file_name);
                    std::fs::write(&path, b"media-bytes")
                        .map_err(|e| ExtractError::Tooling(e.to_string()))?;
                    Ok(FetchedFile {
                        path,
                        info: MediaInfo::default(),
                    })
                }
            }
            FetchPlan::AlwaysTransient => {
                let _ = std::fs::write(spec.dest_dir.join("leftover.mp4.part"), b"partial");
                Err(ExtractError::Transient("simulated network blip".into()))
            }
            FetchPlan::NotFound => Err(ExtractError::NotFound("source was removed".into())),
        };

        self.live_fetches.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct TestApp {
    pub state: AppState,
    pub sink: Arc<MockSink>,
    pub extractor: Arc<MockExtractor>,
    pub tmp: TempDir,
}

/// Build an [`AppState`] on temp storage with the mock extractor. Retry
/// delays are zeroed and the encoder binary pointed at nothing so tests
/// never sleep or shell out.
pub fn build_test_app(extractor: MockExtractor) -> TestApp {
    let tmp = TempDir::new().expect("temp dir");
    let mut config = Config::default();
    config.server.store_path = tmp.path().join("store");
    config.storage.root = tmp.path().join("media");
    config.storage.cache_thumbnails = false;
    config.retry.backoff_base_secs = 0;
    config.retry.channel_base_delay_secs = 0;
    config.transcode.ffmpeg_bin = "mediabox-test-no-ffmpeg".into();
    config.transcode.ffprobe_bin = "mediabox-test-no-ffprobe".into();
    std::fs::create_dir_all(&config.storage.root).expect("media root");

    let store = RecordStore::open(&config.server.store_path).expect("store");
    let sink = Arc::new(MockSink::new());
    let extractor = Arc::new(extractor);

    let state = AppState::new(
        config,
        store,
        extractor.clone(),
        Arc::new(UnconfiguredConnector),
        sink.clone(),
    );
    TestApp {
        state,
        sink,
        extractor,
        tmp,
    }
}

/// Poll the store until the job reaches `predicate` or the deadline passes
pub async fn wait_for_job<F>(state: &AppState, job_id: &str, predicate: F) -> mediabox::model::Job
where
    F: Fn(&mediabox::model::Job) -> bool,
{
    for _ in 0..400 {
        if let Ok(Some(job)) = state.store.get_job(job_id) {
            if predicate(&job) {
                return job;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached the expected state");
}
