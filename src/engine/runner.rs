//! Job lifecycle driver
//!
//! Owns every state transition. `start` validates, preflights, persists
//! `pending`, then hands the job to a spawned worker which acquires a
//! download slot and drives the retry loop. Nothing else may move a job
//! out of `downloading`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::extract::{
    ExtractError, FetchSpec, FetchedFile, MediaExtractor, ProbeOutcome, cleanup_partial_files,
    fetch_thumbnail,
};
use crate::model::{
    Container, Job, JobState, MediaKind, PlaylistInfo, Quality, ValidationError, is_playlist_url,
    validate_source_url,
};
use crate::notify::{Event, NotificationSink};
use crate::observability::Metrics;
use crate::store::{RecordStore, StoreError};
use crate::transcode::{TranscodeError, Transcoder, extension_of, is_browser_playable};

use super::batch::run_pool;
use super::concurrency::{CLASS_CONVERSION, CLASS_DOWNLOAD, ConcurrencyManager};
use super::preflight::{PreflightError, check_free_space, ensure_dir_writable};
use super::progress::{DOWNLOAD_PHASE_CAP, ProgressThrottle};
use super::reclaim::{ReclaimReport, reclaim_orphans};
use super::retry::{RetryPolicy, with_retry};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("cannot {action} a job in state '{state}'")]
    InvalidTransition { action: &'static str, state: String },

    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("conversion failed: {0}")]
    Transcode(#[from] TranscodeError),
}

/// Inputs for creating a job
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub url: String,
    pub name: Option<String>,
    pub quality: Quality,
    pub container: Container,
    pub max_retries: Option<u32>,
    pub auto_retry: Option<bool>,
    pub use_proxy: bool,
    pub proxy_url: Option<String>,
    pub tags: Vec<String>,
}

/// What `start` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Single job queued for a worker
    Queued,
    /// Playlist expanded into children, each queued independently
    Expanded { children: Vec<String>, skipped: u32 },
}

#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    store: Arc<RecordStore>,
    extractor: Arc<dyn MediaExtractor>,
    concurrency: Arc<ConcurrencyManager>,
    transcoder: Arc<Transcoder>,
    notifier: Arc<dyn NotificationSink>,
    metrics: Arc<Metrics>,
}

impl Engine {
    pub fn new(
        config: Arc<Config>,
        store: Arc<RecordStore>,
        extractor: Arc<dyn MediaExtractor>,
        concurrency: Arc<ConcurrencyManager>,
        transcoder: Arc<Transcoder>,
        notifier: Arc<dyn NotificationSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            extractor,
            concurrency,
            transcoder,
            notifier,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn concurrency(&self) -> &Arc<ConcurrencyManager> {
        &self.concurrency
    }

    pub fn transcoder(&self) -> &Arc<Transcoder> {
        &self.transcoder
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn load(&self, job_id: &str) -> Result<Job, EngineError> {
        self.store
            .get_job(job_id)?
            .ok_or_else(|| EngineError::NotFound(job_id.to_string()))
    }

    // ── Lifecycle operations ────────────────────────────────────────────

    pub fn create_job(&self, new: NewJob) -> Result<Job, EngineError> {
        let mut job = Job::new(new.url, new.quality, new.container);
        job.name = new.name;
        if let Some(max_retries) = new.max_retries {
            job.max_retries = max_retries;
        }
        if let Some(auto_retry) = new.auto_retry {
            job.auto_retry = auto_retry;
        }
        job.use_proxy = new.use_proxy;
        job.proxy_url = new.proxy_url;
        job.tags = new.tags;
        job.media.provider_id = crate::model::extract_video_id(&job.url);
        job.validate()?;
        self.store.upsert_job(&job)?;
        info!(job_id = %job.id, url = %job.url, "Job created");
        Ok(job)
    }

    /// Fetch metadata without downloading
    pub async fn probe_job(&self, job_id: &str) -> Result<Job, EngineError> {
        let job = self.load(job_id)?;
        validate_source_url(&job.url)?;

        let outcome = self
            .extractor
            .probe(&job.url, job.proxy_url_if_enabled())
            .await?;

        let updated = match outcome {
            ProbeOutcome::Media(info) => {
                if info.duration_secs == Some(0) {
                    warn!(job_id, "Probed duration is zero: live or invalid source");
                }
                self.store.update_job(job_id, |j| {
                    if j.name.is_none() {
                        j.name = info.title.clone();
                    }
                    j.media = info;
                })?
            }
            ProbeOutcome::Playlist {
                provider_id,
                title,
                entries,
            } => self.store.update_job(job_id, |j| {
                if j.name.is_none() {
                    j.name = title.clone();
                }
                j.playlist = Some(PlaylistInfo {
                    provider_id,
                    title,
                    count: entries.len() as u32,
                    skipped: 0,
                });
            })?,
        };
        Ok(updated)
    }

    /// Start an acquisition (or expand a playlist into child acquisitions)
    pub async fn start_job(&self, job_id: &str) -> Result<StartOutcome, EngineError> {
        let job = self.load(job_id)?;
        if !job.state.can_start() {
            return Err(EngineError::InvalidTransition {
                action: "start",
                state: job.state.as_str().to_string(),
            });
        }
        validate_source_url(&job.url)?;

        // Refuse known-unplayable sources before any heavy work
        if !is_playlist_url(&job.url) && job.media.duration_secs == Some(0) {
            return Err(ValidationError::ZeroDuration.into());
        }

        let dest = self.config.storage.root.clone();
        ensure_dir_writable(&dest)?;
        check_free_space(&dest, self.config.storage.min_free_space)?;

        if is_playlist_url(&job.url) {
            return self.expand_playlist(job).await;
        }

        self.enqueue(job_id)?;
        Ok(StartOutcome::Queued)
    }

    /// Persist `pending` (so a concurrently spawned worker observes it),
    /// then hand off to a worker task.
    fn enqueue(&self, job_id: &str) -> Result<(), EngineError> {
        self.store.update_job(job_id, |j| {
            j.state = JobState::Pending;
            j.progress = 0.0;
            j.error_message = None;
        })?;
        self.metrics.job_started();

        let engine = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            engine.run_acquisition(&job_id).await;
        });
        Ok(())
    }

    /// Resolve the playlist member list, filter unplayable entries, create
    /// one child per member and queue each. The parent becomes a manifest:
    /// `done`, no file of its own.
    async fn expand_playlist(&self, parent: Job) -> Result<StartOutcome, EngineError> {
        let outcome = self
            .extractor
            .probe(&parent.url, parent.proxy_url_if_enabled())
            .await?;
        let (provider_id, title, entries) = match outcome {
            ProbeOutcome::Playlist {
                provider_id,
                title,
                entries,
            } => (provider_id, title, entries),
            ProbeOutcome::Media(_) => {
                return Err(ValidationError::Other(
                    "expected a playlist but the source is a single item".into(),
                )
                .into());
            }
        };

        if entries.is_empty() {
            return Err(ValidationError::Other("no entries found in playlist".into()).into());
        }

        let (kept, skipped): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.duration_secs > 0);
        let skipped = skipped.len() as u32;
        if skipped > 0 {
            info!(
                parent = %parent.id,
                skipped,
                "Skipping zero-duration playlist entries (live or invalid)"
            );
        }
        if kept.is_empty() {
            return Err(ValidationError::Other(
                "no downloadable entries in playlist: every entry has zero duration".into(),
            )
            .into());
        }

        let mut children = Vec::with_capacity(kept.len());
        for (idx, entry) in kept.iter().enumerate() {
            let mut child = Job::new(
                format!("https://www.youtube.com/watch?v={}", entry.provider_id),
                parent.quality,
                parent.container,
            );
            child.name = entry.title.clone();
            child.media.provider_id = Some(entry.provider_id.clone());
            child.media.title = entry.title.clone();
            child.media.duration_secs = Some(entry.duration_secs);
            child.max_retries = parent.max_retries;
            child.auto_retry = parent.auto_retry;
            child.use_proxy = parent.use_proxy;
            child.proxy_url = parent.proxy_url.clone();
            child.tags = parent.tags.clone();
            child.parent_id = Some(parent.id.clone());
            child.playlist_index = Some(idx as u32 + 1);
            self.store.upsert_job(&child)?;
            children.push(child.id.clone());
        }

        let count = children.len() as u32;
        self.store.update_job(&parent.id, |j| {
            j.state = JobState::Done;
            j.name = title.clone().or_else(|| j.name.take());
            j.playlist = Some(PlaylistInfo {
                provider_id: provider_id.clone(),
                title: title.clone(),
                count,
                skipped,
            });
            // A manifest holds no file of its own
            j.file_path = None;
            j.file_name = None;
            j.file_size_bytes = 0;
        })?;
        info!(parent = %parent.id, children = children.len(), skipped, "Playlist expanded");

        for child_id in &children {
            self.enqueue(child_id)?;
        }
        Ok(StartOutcome::Expanded { children, skipped })
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<Job, EngineError> {
        let job = self.load(job_id)?;
        if !job.state.can_cancel() {
            return Err(EngineError::InvalidTransition {
                action: "cancel",
                state: job.state.as_str().to_string(),
            });
        }
        Ok(self.store.update_job(job_id, |j| {
            j.state = JobState::Cancelled;
            j.progress = 0.0;
        })?)
    }

    pub fn reset_job(&self, job_id: &str) -> Result<Job, EngineError> {
        let job = self.load(job_id)?;
        if !job.state.can_reset() {
            return Err(EngineError::InvalidTransition {
                action: "reset",
                state: job.state.as_str().to_string(),
            });
        }
        Ok(self.store.update_job(job_id, |j| j.clear_for_reset())?)
    }

    /// Reset a failed job and start it again
    pub async fn retry_job(&self, job_id: &str) -> Result<StartOutcome, EngineError> {
        let job = self.load(job_id)?;
        if job.state != JobState::Error {
            return Err(EngineError::InvalidTransition {
                action: "retry",
                state: job.state.as_str().to_string(),
            });
        }
        self.store.update_job(job_id, |j| {
            j.state = JobState::Draft;
            j.progress = 0.0;
            j.error_message = None;
        })?;
        self.start_job(job_id).await
    }

    /// Delete the record and (best-effort) its backing file. Refused while
    /// a worker owns the job.
    pub fn delete_job(&self, job_id: &str) -> Result<(), EngineError> {
        let job = self.load(job_id)?;
        if !job.state.can_delete() {
            return Err(EngineError::InvalidTransition {
                action: "delete",
                state: job.state.as_str().to_string(),
            });
        }
        if let Some(path) = &job.file_path {
            let path = PathBuf::from(path);
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(job_id, path = %path.display(), error = %e, "Could not remove file");
                }
            }
        }
        self.store.delete_job(job_id)?;
        info!(job_id, "Job deleted");
        Ok(())
    }

    // ── Worker ──────────────────────────────────────────────────────────

    /// Drive one admitted job to a terminal state. Guard order: permit
    /// first, then re-check the job is still `pending` (it may have been
    /// cancelled or reclaimed while waiting for a slot).
    async fn run_acquisition(&self, job_id: &str) {
        let _permit = self
            .concurrency
            .acquire(CLASS_DOWNLOAD, self.config.concurrency.downloads)
            .await;

        let job = match self.store.get_job(job_id) {
            Ok(Some(job)) if job.state == JobState::Pending => job,
            Ok(Some(job)) => {
                info!(job_id, state = job.state.as_str(), "Skipping: no longer pending");
                return;
            }
            Ok(None) => return,
            Err(e) => {
                warn!(job_id, error = %e, "Could not load job for acquisition");
                return;
            }
        };

        if let Err(e) = self
            .store
            .update_job(job_id, |j| {
                j.state = JobState::Downloading;
                j.progress = 0.0;
            })
            .map(|_| ())
        {
            warn!(job_id, error = %e, "Could not mark job downloading");
            return;
        }

        let started = Instant::now();
        let dest = self.config.storage.root.clone();
        let spec = FetchSpec::new(job.url.clone(), job.quality, job.container, dest.clone())
            .with_proxy(job.proxy_url_if_enabled().map(String::from));

        let max_attempts = if job.auto_retry { job.max_retries.max(1) } else { 1 };
        let policy = RetryPolicy::acquisition(
            max_attempts,
            self.config.retry.backoff_base_secs,
            self.config.retry.backoff_cap_secs,
        );
        let throttle = Arc::new(Mutex::new(ProgressThrottle::from_config(
            &self.config.progress,
        )));

        let attempt_store = self.store.clone();
        let attempt_throttle = throttle.clone();
        let attempt_job_id = job_id.to_string();
        let extractor = self.extractor.clone();
        let result = with_retry(
            &policy,
            move |attempt| {
                attempt_throttle
                    .lock()
                    .expect("progress throttle lock")
                    .reset();
                if let Err(e) = attempt_store.update_job(&attempt_job_id, |j| {
                    j.retry_count = attempt;
                    j.progress = 0.0;
                }) {
                    warn!(job_id = %attempt_job_id, error = %e, "Could not record attempt");
                }
            },
            |_attempt| {
                let spec = spec.clone();
                let dest = dest.clone();
                let extractor = extractor.clone();
                let progress = self.progress_callback(job_id, throttle.clone());
                async move {
                    match extractor.fetch(&spec, progress).await {
                        Ok(fetched) => Ok(fetched),
                        Err(e) => {
                            cleanup_partial_files(&dest);
                            Err(e)
                        }
                    }
                }
            },
        )
        .await;

        match result {
            Ok(fetched) => self.finalize_success(job_id, fetched, started).await,
            Err(retry_err) => {
                let attempts = retry_err.attempts();
                let message = retry_err.to_string();
                warn!(job_id, attempts, error = %message, "Acquisition failed");
                let update = self.store.update_job(job_id, |j| {
                    j.state = JobState::Error;
                    j.progress = 0.0;
                    j.retry_count = attempts;
                    j.error_message = Some(message.clone());
                    j.last_error_at = Some(chrono::Utc::now());
                });
                if let Err(e) = update {
                    warn!(job_id, error = %e, "Could not record job failure");
                }
                self.metrics.job_failed();
                self.notifier
                    .push(Event::JobFinished {
                        job_id: job_id.to_string(),
                        state: JobState::Error.as_str().to_string(),
                        message: Some(message),
                    })
                    .await;
            }
        }
    }

    /// Throttled persistence of raw extractor progress, capped to the
    /// download phase.
    fn progress_callback(
        &self,
        job_id: &str,
        throttle: Arc<Mutex<ProgressThrottle>>,
    ) -> crate::extract::ProgressFn {
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let job_id = job_id.to_string();
        Box::new(move |pct: f32| {
            let capped = pct.clamp(0.0, DOWNLOAD_PHASE_CAP);
            if !throttle.lock().expect("progress throttle lock").admit(capped) {
                return;
            }
            if store
                .update_job(&job_id, |j| j.set_progress(capped))
                .is_ok()
            {
                let notifier = notifier.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move {
                    notifier
                        .push(Event::JobProgress {
                            job_id,
                            progress: capped,
                        })
                        .await;
                });
            }
        })
    }

    async fn finalize_success(&self, job_id: &str, fetched: FetchedFile, started: Instant) {
        if let Err(e) = self.store.update_job(job_id, |j| j.set_progress(95.0)) {
            warn!(job_id, error = %e, "Could not record post-processing progress");
        }

        // Normalize the container when the browser cannot play it. Best
        // effort: the stored artifact is still valid if conversion fails,
        // and the gateway can transcode live.
        let mut final_path = fetched.path.clone();
        let kind = match self.store.get_job(job_id) {
            Ok(Some(j)) if j.quality.is_audio() => MediaKind::Audio,
            _ => MediaKind::Video,
        };
        let ext = extension_of(&fetched.path);
        if !is_browser_playable(&ext, kind) && self.transcoder.is_available().await {
            let _permit = self
                .concurrency
                .acquire(CLASS_CONVERSION, self.config.concurrency.conversions)
                .await;
            let _ = self.store.update_job(job_id, |j| j.set_progress(96.0));
            match self.transcoder.remux_to_mp4(&fetched.path).await {
                Ok(converted) => {
                    self.metrics.transcode_run();
                    final_path = converted;
                }
                Err(e) => {
                    warn!(job_id, error = %e, "Post-fetch conversion failed, keeping original");
                }
            }
        }

        let file_size = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        let elapsed = started.elapsed().as_secs_f64();
        let info = fetched.info;

        let update = self.store.update_job(job_id, |j| {
            j.state = JobState::Done;
            j.progress = 100.0;
            j.file_path = Some(final_path.to_string_lossy().into_owned());
            j.file_name = file_name.clone();
            j.file_size_bytes = file_size;
            j.downloaded_at = Some(chrono::Utc::now());
            j.download_secs = elapsed;
            j.error_message = None;
            if info.title.is_some() {
                if j.name.is_none() {
                    j.name = info.title.clone();
                }
                j.media = info.clone();
            }
        });
        match update {
            Ok(job) => {
                info!(
                    job_id,
                    file = %final_path.display(),
                    size = file_size,
                    secs = elapsed,
                    "Acquisition complete"
                );
                self.metrics.job_completed();
                self.cache_thumbnail(&job).await;
                self.notifier
                    .push(Event::JobFinished {
                        job_id: job_id.to_string(),
                        state: JobState::Done.as_str().to_string(),
                        message: None,
                    })
                    .await;
            }
            Err(e) => warn!(job_id, error = %e, "Could not finalize job"),
        }
    }

    /// Best-effort thumbnail cache next to the media tree
    async fn cache_thumbnail(&self, job: &Job) {
        if !self.config.storage.cache_thumbnails {
            return;
        }
        let Some(url) = job.media.thumbnail_url.as_deref() else {
            return;
        };
        let dir = self.config.storage.thumbnails_dir();
        if std::fs::create_dir_all(&dir).is_err() {
            return;
        }
        match fetch_thumbnail(url).await {
            Ok(bytes) => {
                let path = dir.join(format!("{}.jpg", job.id));
                if let Err(e) = std::fs::write(&path, &bytes) {
                    warn!(job_id = %job.id, error = %e, "Could not cache thumbnail");
                }
            }
            Err(e) => warn!(job_id = %job.id, error = %e, "Thumbnail fetch failed"),
        }
    }

    // ── Conversion / repair ─────────────────────────────────────────────

    /// Convert one finished job's artifact to MP4 under the conversion
    /// limiter. Unlike inline normalization this propagates failures.
    pub async fn convert_job(&self, job_id: &str) -> Result<Job, EngineError> {
        let job = self.load(job_id)?;
        let path = self.eligible_for_convert(&job)?;

        let _permit = self
            .concurrency
            .acquire(CLASS_CONVERSION, self.config.concurrency.conversions)
            .await;
        let converted = self.transcoder.remux_to_mp4(&path).await?;
        self.metrics.transcode_run();

        let size = std::fs::metadata(&converted).map(|m| m.len()).unwrap_or(0);
        Ok(self.store.update_job(job_id, |j| {
            j.file_path = Some(converted.to_string_lossy().into_owned());
            j.file_name = converted
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            j.file_size_bytes = size;
        })?)
    }

    fn eligible_for_convert(&self, job: &Job) -> Result<PathBuf, EngineError> {
        if job.state != JobState::Done {
            return Err(EngineError::InvalidTransition {
                action: "convert",
                state: job.state.as_str().to_string(),
            });
        }
        let path = job
            .file_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .ok_or_else(|| {
                EngineError::Validation(ValidationError::Other("file no longer exists".into()))
            })?;
        let ext = extension_of(&path);
        if job.quality.is_audio() {
            return Err(
                ValidationError::Other("audio files are not converted to MP4".into()).into(),
            );
        }
        if is_browser_playable(&ext, MediaKind::Video) {
            return Err(ValidationError::Other(format!(
                "'{ext}' is already browser-playable"
            ))
            .into());
        }
        Ok(path)
    }

    /// Re-encode the audio track of one finished job in place
    pub async fn repair_job_audio(&self, job_id: &str) -> Result<Job, EngineError> {
        let job = self.load(job_id)?;
        if job.state != JobState::Done {
            return Err(EngineError::InvalidTransition {
                action: "repair",
                state: job.state.as_str().to_string(),
            });
        }
        let path = job
            .file_path
            .as_deref()
            .map(PathBuf::from)
            .filter(|p| p.exists())
            .ok_or_else(|| {
                EngineError::Validation(ValidationError::Other("file no longer exists".into()))
            })?;

        let _permit = self
            .concurrency
            .acquire(CLASS_CONVERSION, self.config.concurrency.conversions)
            .await;
        let size = self.transcoder.repair_audio(&path).await?;
        self.metrics.transcode_run();
        Ok(self
            .store
            .update_job(job_id, |j| j.file_size_bytes = size)?)
    }

    // ── Bulk operations ─────────────────────────────────────────────────

    /// Start every eligible job in the set. Returns (started, skipped).
    pub async fn start_many(&self, ids: &[String]) -> (usize, usize) {
        let mut started = 0;
        let mut skipped = 0;
        for id in ids {
            match self.start_job(id).await {
                Ok(_) => started += 1,
                Err(e) => {
                    info!(job_id = %id, error = %e, "Bulk start skipped job");
                    skipped += 1;
                }
            }
        }
        (started, skipped)
    }

    /// Queue an MP4 conversion batch through the bounded pool.
    /// Returns immediately with (accepted, skipped); completion arrives
    /// through the notification sink.
    pub async fn bulk_convert(&self, ids: Vec<String>) -> Result<(usize, usize), EngineError> {
        if !self.transcoder.is_available().await {
            return Err(
                ValidationError::Other("encoder binary is not installed on this host".into())
                    .into(),
            );
        }

        let mut eligible = Vec::new();
        let mut skipped = 0;
        for id in ids {
            match self.load(&id) {
                Ok(job) if self.eligible_for_convert(&job).is_ok() => eligible.push(id),
                _ => skipped += 1,
            }
        }
        let accepted = eligible.len();
        if accepted == 0 {
            return Ok((0, skipped));
        }

        let engine = self.clone();
        let workers = self.config.concurrency.conversions;
        tokio::spawn(async move {
            let summary = run_pool(eligible, workers, {
                let engine = engine.clone();
                move |id: String| {
                    let engine = engine.clone();
                    async move {
                        match engine.convert_job(&id).await {
                            Ok(_) => true,
                            Err(e) => {
                                warn!(job_id = %id, error = %e, "Bulk conversion unit failed");
                                false
                            }
                        }
                    }
                }
            })
            .await;
            engine
                .notifier
                .push(Event::BatchCompleted {
                    operation: "convert".into(),
                    total: summary.total,
                    done: summary.done,
                    errors: summary.errors,
                })
                .await;
        });
        Ok((accepted, skipped))
    }

    /// Queue an audio-repair batch; same acknowledgment contract as
    /// [`Engine::bulk_convert`].
    pub async fn bulk_repair(&self, ids: Vec<String>) -> Result<(usize, usize), EngineError> {
        if !self.transcoder.is_available().await {
            return Err(
                ValidationError::Other("encoder binary is not installed on this host".into())
                    .into(),
            );
        }

        let mut eligible = Vec::new();
        let mut skipped = 0;
        for id in ids {
            match self.load(&id) {
                Ok(job)
                    if job.state == JobState::Done
                        && job
                            .file_path
                            .as_deref()
                            .is_some_and(|p| std::path::Path::new(p).exists()) =>
                {
                    eligible.push(id)
                }
                _ => skipped += 1,
            }
        }
        let accepted = eligible.len();
        if accepted == 0 {
            return Ok((0, skipped));
        }

        let engine = self.clone();
        let workers = self.config.concurrency.conversions;
        tokio::spawn(async move {
            let summary = run_pool(eligible, workers, {
                let engine = engine.clone();
                move |id: String| {
                    let engine = engine.clone();
                    async move {
                        match engine.repair_job_audio(&id).await {
                            Ok(_) => true,
                            Err(e) => {
                                warn!(job_id = %id, error = %e, "Bulk repair unit failed");
                                false
                            }
                        }
                    }
                }
            })
            .await;
            engine
                .notifier
                .push(Event::BatchCompleted {
                    operation: "repair-audio".into(),
                    total: summary.total,
                    done: summary.done,
                    errors: summary.errors,
                })
                .await;
        });
        Ok((accepted, skipped))
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    pub fn reclaim(&self) -> Result<ReclaimReport, EngineError> {
        let threshold = chrono::Duration::minutes(self.config.reclaim.threshold_minutes as i64);
        let report = reclaim_orphans(&self.store, threshold)?;
        self.metrics
            .orphans_reclaimed((report.jobs_reset + report.items_reset) as u64);
        Ok(report)
    }

    /// Drain in-flight work before process exit
    pub async fn shutdown(&self) {
        self.concurrency.shutdown().await;
    }
}

trait ProxyUrl {
    fn proxy_url_if_enabled(&self) -> Option<&str>;
}

impl ProxyUrl for Job {
    fn proxy_url_if_enabled(&self) -> Option<&str> {
        if self.use_proxy {
            self.proxy_url.as_deref()
        } else {
            None
        }
    }
}
