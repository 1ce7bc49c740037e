//! Secondary-provider channel coordinator
//!
//! The provider exposes a single exclusive session resource: one logical
//! connection at a time per host credential store. A process-wide mutex
//! (owned by the [`ConcurrencyManager`]) serializes every scan/batch that
//! opens it, while an inner semaphore fans N item fetches out *within*
//! the one connection.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{
    CLASS_CHANNEL_BATCH, ConcurrencyManager, ProgressThrottle, RetryClass, RetryPolicy,
    ensure_dir_writable, with_retry,
};
use crate::extract::ProgressFn;
use crate::model::{ChannelItem, ChannelItemState, ChannelScanState, MediaKind};
use crate::notify::{Event, NotificationSink};
use crate::store::RecordStore;
use crate::transcode::{Transcoder, extension_of, is_browser_playable};

/// Pause after each completed item, to stay under provider rate limits
const INTER_ITEM_PAUSE: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel session is not authorized")]
    AuthRequired,

    #[error("channel or message not found: {0}")]
    NotFound(String),

    #[error("transient channel failure: {0}")]
    Transient(String),

    #[error("session error: {0}")]
    Session(String),
}

impl RetryClass for ChannelError {
    fn retriable(&self) -> bool {
        matches!(self, ChannelError::Transient(_))
    }
}

/// One media entry discovered while enumerating a channel
#[derive(Debug, Clone)]
pub struct ChannelMediaRef {
    pub message_id: i64,
    pub caption: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: u64,
    pub duration_secs: Option<u64>,
    pub resolution: Option<String>,
}

/// A connected provider session. Implementations wrap the actual client
/// library; the coordinator only sees this narrow surface.
#[async_trait]
pub trait ChannelSession: Send + Sync {
    async fn list_media(
        &self,
        channel: &str,
        limit: u32,
    ) -> Result<Vec<ChannelMediaRef>, ChannelError>;

    async fn fetch_media(
        &self,
        channel: &str,
        message_id: i64,
        dest_dir: &Path,
        progress: ProgressFn,
    ) -> Result<PathBuf, ChannelError>;

    async fn disconnect(&self);
}

/// Opens the exclusive session. Callers must hold the session mutex for
/// the whole connect..disconnect span.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ChannelSession>, ChannelError>;
}

/// Stand-in connector for hosts without a provisioned channel session.
/// Every open fails with a typed auth error, so channel endpoints degrade
/// cleanly instead of panicking.
#[derive(Debug, Default)]
pub struct UnconfiguredConnector;

#[async_trait]
impl ChannelConnector for UnconfiguredConnector {
    async fn connect(&self) -> Result<Arc<dyn ChannelSession>, ChannelError> {
        Err(ChannelError::AuthRequired)
    }
}

#[derive(Clone)]
pub struct ChannelCoordinator {
    config: Arc<Config>,
    store: Arc<RecordStore>,
    concurrency: Arc<ConcurrencyManager>,
    connector: Arc<dyn ChannelConnector>,
    transcoder: Arc<Transcoder>,
    notifier: Arc<dyn NotificationSink>,
}

impl ChannelCoordinator {
    pub fn new(
        config: Arc<Config>,
        store: Arc<RecordStore>,
        concurrency: Arc<ConcurrencyManager>,
        connector: Arc<dyn ChannelConnector>,
        transcoder: Arc<Transcoder>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            store,
            concurrency,
            connector,
            transcoder,
            notifier,
        }
    }

    /// Enumerate a channel's media list, creating one item per entry.
    /// Holds the exclusive session for the duration of the scan.
    pub async fn scan(&self, scan_id: &str) -> Result<usize, ChannelError> {
        let scan = self
            .store
            .get_scan(scan_id)
            .map_err(|e| ChannelError::Session(e.to_string()))?
            .ok_or_else(|| ChannelError::NotFound(format!("scan {scan_id}")))?;

        self.store
            .update_scan(scan_id, |s| {
                s.state = ChannelScanState::Scanning;
                s.error_message = None;
            })
            .map_err(|e| ChannelError::Session(e.to_string()))?;

        let session_lock = self.concurrency.session_lock();
        let _session_guard = session_lock.lock().await;

        let result = async {
            let session = self.connector.connect().await?;
            let listed = session
                .list_media(&scan.identifier, scan.scan_limit)
                .await;
            session.disconnect().await;
            listed
        }
        .await;

        match result {
            Ok(entries) => {
                let mut created = 0;
                for entry in &entries {
                    let mut item = ChannelItem::new(scan_id.to_string(), entry.message_id);
                    item.caption = entry.caption.clone();
                    item.file_name = entry.file_name.clone();
                    item.size_hint_bytes = entry.size_bytes;
                    item.duration_secs = entry.duration_secs;
                    item.resolution = entry.resolution.clone();
                    if self
                        .store
                        .upsert_item(&item)
                        .map_err(|e| ChannelError::Session(e.to_string()))
                        .is_ok()
                    {
                        created += 1;
                    }
                }
                self.store
                    .update_scan(scan_id, |s| {
                        s.state = ChannelScanState::Done;
                        s.item_count = created as u32;
                    })
                    .map_err(|e| ChannelError::Session(e.to_string()))?;
                info!(scan_id, items = created, "Channel scan complete");
                Ok(created)
            }
            Err(e) => {
                let message = e.to_string();
                let _ = self.store.update_scan(scan_id, |s| {
                    s.state = ChannelScanState::Error;
                    s.error_message = Some(message.clone());
                });
                Err(e)
            }
        }
    }

    /// Download a set of items through ONE connection, fanned out under
    /// the inner semaphore. Items are marked pending synchronously so the
    /// caller's acknowledgment reflects reality.
    pub async fn download_batch(&self, item_ids: Vec<String>) -> usize {
        let mut queued = Vec::new();
        for id in item_ids {
            let marked = self.store.update_item(&id, |i| {
                if !i.state.is_active() {
                    i.state = ChannelItemState::Pending;
                    i.progress = 0.0;
                    i.error_message = None;
                }
            });
            match marked {
                Ok(item) if item.state == ChannelItemState::Pending => queued.push(id),
                Ok(_) | Err(_) => {}
            }
        }
        if queued.is_empty() {
            return 0;
        }

        let count = queued.len();
        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run_batch(queued).await;
        });
        count
    }

    async fn run_batch(&self, item_ids: Vec<String>) {
        let limit = self.config.concurrency.channel_batch.clamp(1, 10);
        let total = item_ids.len();
        info!(total, limit, "Channel batch starting");

        // Exclusive session: one connection for the whole batch, never
        // opened while another scan/batch holds it.
        let session_lock = self.concurrency.session_lock();
        let _session_guard = session_lock.lock().await;

        let session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                let message = e.to_string();
                warn!(error = %message, "Channel batch could not connect");
                for id in &item_ids {
                    let _ = self.store.update_item(id, |i| {
                        i.state = ChannelItemState::Error;
                        i.progress = 0.0;
                        i.error_message = Some(message.clone());
                    });
                }
                return;
            }
        };

        let semaphore = self
            .concurrency
            .semaphore(CLASS_CHANNEL_BATCH, limit);
        let mut tasks = JoinSet::new();
        let mut done = 0usize;
        let mut errors = 0usize;

        for item_id in item_ids {
            let coordinator = self.clone();
            let session = session.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("channel batch semaphore closed");
                let ok = coordinator.fetch_one(&session, &item_id).await;
                tokio::time::sleep(INTER_ITEM_PAUSE).await;
                ok
            });
        }
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => done += 1,
                _ => errors += 1,
            }
        }

        session.disconnect().await;
        info!(total, done, errors, "Channel batch finished");
        self.notifier
            .push(Event::BatchCompleted {
                operation: "channel-batch".into(),
                total,
                done,
                errors,
            })
            .await;
    }

    /// One item: retry loop around the session fetch, then post-fetch
    /// container normalization.
    async fn fetch_one(&self, session: &Arc<dyn ChannelSession>, item_id: &str) -> bool {
        let item = match self.store.get_item(item_id) {
            Ok(Some(item)) if item.state == ChannelItemState::Pending => item,
            _ => return false,
        };
        let scan = match self.store.get_scan(&item.scan_id) {
            Ok(Some(scan)) => scan,
            _ => return false,
        };

        let dest = self.config.storage.channels_dir().join(&scan.identifier);
        if let Err(e) = ensure_dir_writable(&dest) {
            let _ = self.store.update_item(item_id, |i| {
                i.state = ChannelItemState::Error;
                i.error_message = Some(e.to_string());
            });
            return false;
        }

        if self
            .store
            .update_item(item_id, |i| {
                i.state = ChannelItemState::Downloading;
                i.progress = 0.0;
            })
            .is_err()
        {
            return false;
        }

        let policy = RetryPolicy::channel(
            self.config.retry.channel_attempts,
            self.config.retry.channel_base_delay_secs,
        );
        let throttle = Arc::new(Mutex::new(ProgressThrottle::from_config(
            &self.config.progress,
        )));

        let attempt_throttle = throttle.clone();
        let result = with_retry(
            &policy,
            move |_attempt| {
                attempt_throttle
                    .lock()
                    .expect("progress throttle lock")
                    .reset();
            },
            |_attempt| {
                let session = session.clone();
                let channel = scan.identifier.clone();
                let dest = dest.clone();
                let progress = self.item_progress_callback(item_id, throttle.clone());
                let message_id = item.message_id;
                async move {
                    session
                        .fetch_media(&channel, message_id, &dest, progress)
                        .await
                }
            },
        )
        .await;

        match result {
            Ok(path) => {
                let final_path = self.normalize_container(&path).await;
                let size = std::fs::metadata(&final_path).map(|m| m.len()).unwrap_or(0);
                let update = self.store.update_item(item_id, |i| {
                    i.state = ChannelItemState::Done;
                    i.progress = 100.0;
                    i.file_path = Some(final_path.to_string_lossy().into_owned());
                    i.file_size_bytes = size;
                    i.error_message = None;
                });
                update.is_ok()
            }
            Err(retry_err) => {
                let message = retry_err.to_string();
                warn!(item_id, error = %message, "Channel item failed");
                let _ = self.store.update_item(item_id, |i| {
                    i.state = ChannelItemState::Error;
                    i.progress = 0.0;
                    i.error_message = Some(message.clone());
                });
                false
            }
        }
    }

    /// Best-effort remux for containers the browser cannot play
    async fn normalize_container(&self, path: &Path) -> PathBuf {
        let ext = extension_of(path);
        if is_browser_playable(&ext, MediaKind::Video)
            || crate::model::kind_for_extension(&ext) == Some(MediaKind::Audio)
            || !self.transcoder.is_available().await
        {
            return path.to_path_buf();
        }
        match self.transcoder.remux_to_mp4(path).await {
            Ok(converted) => converted,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Channel item conversion failed, keeping original");
                path.to_path_buf()
            }
        }
    }

    fn item_progress_callback(
        &self,
        item_id: &str,
        throttle: Arc<Mutex<ProgressThrottle>>,
    ) -> ProgressFn {
        let store = self.store.clone();
        let item_id = item_id.to_string();
        Box::new(move |pct: f32| {
            let capped = pct.clamp(0.0, 100.0);
            if throttle.lock().expect("progress throttle lock").admit(capped) {
                let _ = store.update_item(&item_id, |i| i.set_progress(capped));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChannelScan;
    use crate::notify::MockSink;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct MockSession {
        fail_attempts: u32,
        attempts: AtomicU32,
        dest_file: &'static str,
    }

    #[async_trait]
    impl ChannelSession for MockSession {
        async fn list_media(
            &self,
            _channel: &str,
            limit: u32,
        ) -> Result<Vec<ChannelMediaRef>, ChannelError> {
            Ok((0..limit.min(3) as i64)
                .map(|i| ChannelMediaRef {
                    message_id: i + 1,
                    caption: Some(format!("clip {}", i + 1)),
                    file_name: Some(format!("clip{}.mp4", i + 1)),
                    size_bytes: 1024,
                    duration_secs: Some(60),
                    resolution: Some("1280x720".into()),
                })
                .collect())
        }

        async fn fetch_media(
            &self,
            _channel: &str,
            message_id: i64,
            dest_dir: &Path,
            mut progress: ProgressFn,
        ) -> Result<PathBuf, ChannelError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.fail_attempts {
                return Err(ChannelError::Transient("flaky network".into()));
            }
            progress(50.0);
            progress(100.0);
            let path = dest_dir.join(format!("{}-{}", message_id, self.dest_file));
            std::fs::write(&path, b"media-bytes").map_err(|e| ChannelError::Session(e.to_string()))?;
            Ok(path)
        }

        async fn disconnect(&self) {}
    }

    struct MockConnector {
        fail_attempts: u32,
        connected: AtomicUsize,
        concurrent: Arc<AtomicUsize>,
        overlap_seen: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(fail_attempts: u32) -> Self {
            Self {
                fail_attempts,
                connected: AtomicUsize::new(0),
                concurrent: Arc::new(AtomicUsize::new(0)),
                overlap_seen: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    #[async_trait]
    impl ChannelConnector for MockConnector {
        async fn connect(&self) -> Result<Arc<dyn ChannelSession>, ChannelError> {
            let live = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            if live > 1 {
                self.overlap_seen.store(true, Ordering::SeqCst);
            }
            // Simulate connection setup so overlap would be observable
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.connected.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockSession {
                fail_attempts: self.fail_attempts,
                attempts: AtomicU32::new(0),
                dest_file: "clip.mp4",
            }))
        }
    }

    struct TestBed {
        coordinator: ChannelCoordinator,
        store: Arc<RecordStore>,
        sink: Arc<MockSink>,
        _tmp: TempDir,
    }

    fn testbed(fail_attempts: u32) -> (TestBed, Arc<MockConnector>) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = tmp.path().join("media");
        config.retry.channel_base_delay_secs = 0;
        let config = Arc::new(config);
        let store = Arc::new(RecordStore::open(tmp.path().join("store")).unwrap());
        let concurrency = Arc::new(ConcurrencyManager::new());
        let connector = Arc::new(MockConnector::new(fail_attempts));
        let transcoder = Arc::new(Transcoder::new(crate::config::TranscodeConfig {
            ffmpeg_bin: "missing-ffmpeg-for-tests".into(),
            ..Default::default()
        }));
        let sink = Arc::new(MockSink::new());
        let coordinator = ChannelCoordinator::new(
            config,
            store.clone(),
            concurrency,
            connector.clone(),
            transcoder,
            sink.clone(),
        );
        (
            TestBed {
                coordinator,
                store,
                sink,
                _tmp: tmp,
            },
            connector,
        )
    }

    fn seed_scan_with_items(store: &RecordStore, n: usize) -> (ChannelScan, Vec<String>) {
        let scan = ChannelScan::new("testchannel", 100);
        store.upsert_scan(&scan).unwrap();
        let ids = (0..n)
            .map(|i| {
                let item = ChannelItem::new(scan.id.clone(), i as i64 + 1);
                store.upsert_item(&item).unwrap();
                item.id
            })
            .collect();
        (scan, ids)
    }

    #[tokio::test]
    async fn scan_creates_items() {
        let (bed, _connector) = testbed(0);
        let scan = ChannelScan::new("testchannel", 3);
        bed.store.upsert_scan(&scan).unwrap();

        let created = bed.coordinator.scan(&scan.id).await.unwrap();
        assert_eq!(created, 3);

        let stored = bed.store.get_scan(&scan.id).unwrap().unwrap();
        assert_eq!(stored.state, ChannelScanState::Done);
        assert_eq!(stored.item_count, 3);
        let items = bed.store.items_where(|i| i.scan_id == scan.id).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[tokio::test]
    async fn batch_downloads_items_and_notifies_once() {
        let (bed, _connector) = testbed(0);
        let (_scan, ids) = seed_scan_with_items(&bed.store, 3);

        let queued = bed.coordinator.download_batch(ids.clone()).await;
        assert_eq!(queued, 3);

        // Poll until the fire-and-forget batch lands
        for _ in 0..200 {
            let done = bed
                .store
                .items_where(|i| i.state == ChannelItemState::Done)
                .unwrap();
            if done.len() == 3 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let done = bed
            .store
            .items_where(|i| i.state == ChannelItemState::Done)
            .unwrap();
        assert_eq!(done.len(), 3);
        for item in &done {
            assert_eq!(item.progress, 100.0);
            assert!(item.file_path.is_some());
        }

        let batch_events: Vec<_> = bed
            .sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::BatchCompleted { .. }))
            .collect();
        assert_eq!(batch_events.len(), 1);
        assert!(matches!(
            batch_events[0],
            Event::BatchCompleted { total: 3, done: 3, errors: 0, .. }
        ));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_session() {
        // Each MockSession fails its first 2 fetch calls; with 3 attempts
        // per item the single item must still succeed.
        let (bed, _connector) = testbed(2);
        let (_scan, ids) = seed_scan_with_items(&bed.store, 1);

        bed.coordinator.download_batch(ids.clone()).await;
        for _ in 0..200 {
            let item = bed.store.get_item(&ids[0]).unwrap().unwrap();
            if item.state == ChannelItemState::Done {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("item never completed despite retriable failures");
    }

    #[tokio::test]
    async fn concurrent_batches_never_overlap_the_session() {
        let (bed, connector) = testbed(0);
        let (_scan_a, ids_a) = seed_scan_with_items(&bed.store, 2);
        let (_scan_b, ids_b) = seed_scan_with_items(&bed.store, 2);

        bed.coordinator.download_batch(ids_a).await;
        bed.coordinator.download_batch(ids_b).await;

        for _ in 0..300 {
            if connector.connected.load(Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(connector.connected.load(Ordering::SeqCst), 2);
        assert!(
            !connector.overlap_seen.load(Ordering::SeqCst),
            "two batches opened the exclusive session simultaneously"
        );
    }
}
