//! Orphan job reclamation
//!
//! A worker can die (restart, crash, network partition) without reaching
//! its own cleanup path, leaving a record active forever with no owner.
//! This sweep resets anything active-but-untouched past a liveness
//! threshold. An external scheduler triggers it; it schedules nothing
//! itself.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::model::{ChannelItemState, JobState};
use crate::store::{RecordStore, Result};

pub const ORPHAN_MESSAGE: &str = "Reset automatically: worker went away during download";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReclaimReport {
    pub jobs_reset: usize,
    pub items_reset: usize,
}

/// Reset jobs and channel items stuck in an active state with no update
/// since `threshold` ago.
pub fn reclaim_orphans(store: &RecordStore, threshold: Duration) -> Result<ReclaimReport> {
    let cutoff = Utc::now() - threshold;
    let mut report = ReclaimReport::default();

    let stuck_jobs = store.jobs_where(|j| j.state.is_active() && j.updated_at < cutoff)?;
    if !stuck_jobs.is_empty() {
        warn!(count = stuck_jobs.len(), "Orphaned job(s) detected, resetting");
    }
    for job in stuck_jobs {
        store.update_job(&job.id, |j| {
            j.state = JobState::Draft;
            j.progress = 0.0;
            j.error_message = Some(ORPHAN_MESSAGE.to_string());
        })?;
        report.jobs_reset += 1;
    }

    let stuck_items = store.items_where(|i| i.state.is_active() && i.updated_at < cutoff)?;
    for item in stuck_items {
        store.update_item(&item.id, |i| {
            i.state = ChannelItemState::Draft;
            i.progress = 0.0;
            i.error_message = Some(ORPHAN_MESSAGE.to_string());
        })?;
        report.items_reset += 1;
    }

    if report.jobs_reset + report.items_reset > 0 {
        info!(
            jobs = report.jobs_reset,
            items = report.items_reset,
            "Orphan reclaim complete"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChannelItem, ChannelScan, Container, Job, Quality};
    use tempfile::TempDir;

    fn store() -> (RecordStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::open(tmp.path().join("store")).unwrap();
        (store, tmp)
    }

    fn job_in_state(state: JobState, minutes_old: i64) -> Job {
        let mut job = Job::new(
            "https://www.youtube.com/watch?v=abc",
            Quality::P720,
            Container::Mp4,
        );
        job.state = state;
        job.updated_at = Utc::now() - Duration::minutes(minutes_old);
        job
    }

    #[test]
    fn resets_stale_active_jobs_only() {
        let (store, _tmp) = store();
        let stale = job_in_state(JobState::Downloading, 31);
        let fresh = job_in_state(JobState::Downloading, 10);
        let done = job_in_state(JobState::Done, 120);
        store.upsert_job(&stale).unwrap();
        store.upsert_job(&fresh).unwrap();
        store.upsert_job(&done).unwrap();

        let report = reclaim_orphans(&store, Duration::minutes(30)).unwrap();
        assert_eq!(report.jobs_reset, 1);

        let reclaimed = store.get_job(&stale.id).unwrap().unwrap();
        assert_eq!(reclaimed.state, JobState::Draft);
        assert_eq!(reclaimed.progress, 0.0);
        assert!(!reclaimed.error_message.as_deref().unwrap_or("").is_empty());

        // Untouched: recent active and terminal records
        assert_eq!(
            store.get_job(&fresh.id).unwrap().unwrap().state,
            JobState::Downloading
        );
        assert_eq!(
            store.get_job(&done.id).unwrap().unwrap().state,
            JobState::Done
        );
    }

    #[test]
    fn resets_stale_channel_items() {
        let (store, _tmp) = store();
        let scan = ChannelScan::new("chan", 100);
        store.upsert_scan(&scan).unwrap();

        let mut stale = ChannelItem::new(scan.id.clone(), 1);
        stale.state = ChannelItemState::Downloading;
        stale.updated_at = Utc::now() - Duration::minutes(45);
        let mut fresh = ChannelItem::new(scan.id.clone(), 2);
        fresh.state = ChannelItemState::Pending;
        store.upsert_item(&stale).unwrap();
        store.upsert_item(&fresh).unwrap();

        let report = reclaim_orphans(&store, Duration::minutes(30)).unwrap();
        assert_eq!(report.items_reset, 1);
        assert_eq!(
            store.get_item(&stale.id).unwrap().unwrap().state,
            ChannelItemState::Draft
        );
        assert_eq!(
            store.get_item(&fresh.id).unwrap().unwrap().state,
            ChannelItemState::Pending
        );
    }

    #[test]
    fn empty_store_reports_zero() {
        let (store, _tmp) = store();
        let report = reclaim_orphans(&store, Duration::minutes(30)).unwrap();
        assert_eq!(report, ReclaimReport::default());
    }
}
