use std::path::Path;
use std::sync::Mutex;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info};

use crate::model::{ChannelItem, ChannelScan, ExternalMedia, Job};

use super::error::{Result, StoreError};
use super::keys::{encode_external_key, encode_item_key, encode_job_key, encode_scan_key};

/// Fjall-backed persistent store for jobs, channel scans/items and
/// external media.
///
/// Workers follow a read-modify-write discipline through `update_*`; the
/// internal write lock serializes those cycles so concurrent workers never
/// clobber each other's field updates. Reads are lock-free and see every
/// committed write (read-after-write).
pub struct RecordStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    channel_scans: PartitionHandle,
    channel_items: PartitionHandle,
    external: PartitionHandle,
    write_lock: Mutex<()>,
}

impl RecordStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening record store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let channel_scans =
            keyspace.open_partition("channel_scans", PartitionCreateOptions::default())?;
        let channel_items =
            keyspace.open_partition("channel_items", PartitionCreateOptions::default())?;
        let external = keyspace.open_partition("external", PartitionCreateOptions::default())?;

        Ok(Self {
            keyspace,
            jobs,
            channel_scans,
            channel_items,
            external,
            write_lock: Mutex::new(()),
        })
    }

    // ── Jobs ────────────────────────────────────────────────────────────

    pub fn upsert_job(&self, job: &Job) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock");
        self.put_job(job)
    }

    fn put_job(&self, job: &Job) -> Result<()> {
        let key = encode_job_key(&job.id);
        let value = serde_json::to_vec(job)?;
        self.jobs.insert(key, value)?;
        debug!(job_id = %job.id, state = job.state.as_str(), "Upserted job");
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write a job under the store write lock. Returns the
    /// updated record, or `NotFound` if the job vanished.
    pub fn update_job<F>(&self, job_id: &str, mutate: F) -> Result<Job>
    where
        F: FnOnce(&mut Job),
    {
        let _guard = self.write_lock.lock().expect("store write lock");
        let mut job = match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => serde_json::from_slice::<Job>(&value)?,
            None => return Err(StoreError::NotFound(format!("job {job_id}"))),
        };
        mutate(&mut job);
        job.touch();
        self.put_job(&job)?;
        Ok(job)
    }

    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock");
        self.jobs.remove(encode_job_key(job_id))?;
        debug!(job_id, "Deleted job");
        Ok(())
    }

    /// Scan the jobs partition, keeping records the predicate accepts
    pub fn jobs_where<F>(&self, pred: F) -> Result<Vec<Job>>
    where
        F: Fn(&Job) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.jobs.iter() {
            let (_key, value) = entry?;
            let job: Job = serde_json::from_slice(&value)?;
            if pred(&job) {
                out.push(job);
            }
        }
        Ok(out)
    }

    // ── Channel scans ───────────────────────────────────────────────────

    pub fn upsert_scan(&self, scan: &ChannelScan) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock");
        let value = serde_json::to_vec(scan)?;
        self.channel_scans.insert(encode_scan_key(&scan.id), value)?;
        Ok(())
    }

    pub fn get_scan(&self, scan_id: &str) -> Result<Option<ChannelScan>> {
        match self.channel_scans.get(encode_scan_key(scan_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn update_scan<F>(&self, scan_id: &str, mutate: F) -> Result<ChannelScan>
    where
        F: FnOnce(&mut ChannelScan),
    {
        let _guard = self.write_lock.lock().expect("store write lock");
        let mut scan = match self.channel_scans.get(encode_scan_key(scan_id))? {
            Some(value) => serde_json::from_slice::<ChannelScan>(&value)?,
            None => return Err(StoreError::NotFound(format!("scan {scan_id}"))),
        };
        mutate(&mut scan);
        scan.touch();
        let value = serde_json::to_vec(&scan)?;
        self.channel_scans.insert(encode_scan_key(scan_id), value)?;
        Ok(scan)
    }

    // ── Channel items ───────────────────────────────────────────────────

    pub fn upsert_item(&self, item: &ChannelItem) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock");
        let value = serde_json::to_vec(item)?;
        self.channel_items.insert(encode_item_key(&item.id), value)?;
        Ok(())
    }

    pub fn get_item(&self, item_id: &str) -> Result<Option<ChannelItem>> {
        match self.channel_items.get(encode_item_key(item_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn update_item<F>(&self, item_id: &str, mutate: F) -> Result<ChannelItem>
    where
        F: FnOnce(&mut ChannelItem),
    {
        let _guard = self.write_lock.lock().expect("store write lock");
        let mut item = match self.channel_items.get(encode_item_key(item_id))? {
            Some(value) => serde_json::from_slice::<ChannelItem>(&value)?,
            None => return Err(StoreError::NotFound(format!("item {item_id}"))),
        };
        mutate(&mut item);
        item.touch();
        let value = serde_json::to_vec(&item)?;
        self.channel_items.insert(encode_item_key(item_id), value)?;
        Ok(item)
    }

    pub fn delete_item(&self, item_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock");
        self.channel_items.remove(encode_item_key(item_id))?;
        Ok(())
    }

    pub fn items_where<F>(&self, pred: F) -> Result<Vec<ChannelItem>>
    where
        F: Fn(&ChannelItem) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.channel_items.iter() {
            let (_key, value) = entry?;
            let item: ChannelItem = serde_json::from_slice(&value)?;
            if pred(&item) {
                out.push(item);
            }
        }
        Ok(out)
    }

    // ── External media ──────────────────────────────────────────────────

    pub fn upsert_external(&self, media: &ExternalMedia) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock");
        let value = serde_json::to_vec(media)?;
        self.external.insert(encode_external_key(&media.id), value)?;
        Ok(())
    }

    pub fn get_external(&self, media_id: &str) -> Result<Option<ExternalMedia>> {
        match self.external.get(encode_external_key(media_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn update_external<F>(&self, media_id: &str, mutate: F) -> Result<ExternalMedia>
    where
        F: FnOnce(&mut ExternalMedia),
    {
        let _guard = self.write_lock.lock().expect("store write lock");
        let mut media = match self.external.get(encode_external_key(media_id))? {
            Some(value) => serde_json::from_slice::<ExternalMedia>(&value)?,
            None => return Err(StoreError::NotFound(format!("external media {media_id}"))),
        };
        mutate(&mut media);
        media.touch();
        let value = serde_json::to_vec(&media)?;
        self.external.insert(encode_external_key(media_id), value)?;
        Ok(media)
    }

    pub fn externals_where<F>(&self, pred: F) -> Result<Vec<ExternalMedia>>
    where
        F: Fn(&ExternalMedia) -> bool,
    {
        let mut out = Vec::new();
        for entry in self.external.iter() {
            let (_key, value) = entry?;
            let media: ExternalMedia = serde_json::from_slice(&value)?;
            if pred(&media) {
                out.push(media);
            }
        }
        Ok(out)
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Container, JobState, Quality};
    use tempfile::TempDir;

    fn create_test_store() -> (RecordStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RecordStore::open(temp_dir.path().join("store")).unwrap();
        (store, temp_dir)
    }

    fn test_job() -> Job {
        Job::new(
            "https://www.youtube.com/watch?v=abc123",
            Quality::P720,
            Container::Mp4,
        )
    }

    #[test]
    fn test_upsert_and_get_job() {
        let (store, _tmp) = create_test_store();
        let job = test_job();

        store.upsert_job(&job).unwrap();
        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.url, job.url);
        assert_eq!(loaded.state, JobState::Draft);
    }

    #[test]
    fn test_get_nonexistent_job() {
        let (store, _tmp) = create_test_store();
        assert!(store.get_job("nope").unwrap().is_none());
    }

    #[test]
    fn test_update_job_read_after_write() {
        let (store, _tmp) = create_test_store();
        let job = test_job();
        store.upsert_job(&job).unwrap();

        let updated = store
            .update_job(&job.id, |j| {
                j.state = JobState::Pending;
                j.progress = 12.5;
            })
            .unwrap();
        assert_eq!(updated.state, JobState::Pending);

        // Readers see the write immediately
        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.state, JobState::Pending);
        assert_eq!(loaded.progress, 12.5);
        assert!(loaded.updated_at >= job.updated_at);
    }

    #[test]
    fn test_update_missing_job_is_not_found() {
        let (store, _tmp) = create_test_store();
        let err = store.update_job("ghost", |_| {}).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_delete_job() {
        let (store, _tmp) = create_test_store();
        let job = test_job();
        store.upsert_job(&job).unwrap();
        store.delete_job(&job.id).unwrap();
        assert!(store.get_job(&job.id).unwrap().is_none());
    }

    #[test]
    fn test_jobs_where_filters() {
        let (store, _tmp) = create_test_store();
        let mut a = test_job();
        a.state = JobState::Done;
        let b = test_job();
        store.upsert_job(&a).unwrap();
        store.upsert_job(&b).unwrap();

        let done = store.jobs_where(|j| j.state == JobState::Done).unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a.id);
        let all = store.jobs_where(|_| true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_channel_item_roundtrip() {
        let (store, _tmp) = create_test_store();
        let scan = ChannelScan::new("somechannel", 100);
        store.upsert_scan(&scan).unwrap();

        let item = ChannelItem::new(scan.id.clone(), 42);
        store.upsert_item(&item).unwrap();

        let loaded = store.get_item(&item.id).unwrap().unwrap();
        assert_eq!(loaded.message_id, 42);

        let by_scan = store.items_where(|i| i.scan_id == scan.id).unwrap();
        assert_eq!(by_scan.len(), 1);
    }

    #[test]
    fn test_external_media_roundtrip() {
        let (store, _tmp) = create_test_store();
        let media = ExternalMedia::new("clip");
        store.upsert_external(&media).unwrap();
        let loaded = store.get_external(&media.id).unwrap().unwrap();
        assert_eq!(loaded.name, "clip");
    }
}
