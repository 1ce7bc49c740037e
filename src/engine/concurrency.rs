//! Process-wide concurrency limiter
//!
//! A registry of counting semaphores keyed by (class, limit), plus the
//! single exclusive-session mutex for the channel provider. Constructed
//! once and injected — no module-level globals. Admission blocks until a
//! slot frees; there is deliberately no acquisition timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Concurrency class names
pub const CLASS_DOWNLOAD: &str = "download";
pub const CLASS_CONVERSION: &str = "conversion";
pub const CLASS_CHANNEL_BATCH: &str = "channel-batch";

pub struct ConcurrencyManager {
    semaphores: Mutex<HashMap<(String, usize), Arc<Semaphore>>>,
    session_lock: Arc<AsyncMutex<()>>,
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyManager {
    pub fn new() -> Self {
        Self {
            semaphores: Mutex::new(HashMap::new()),
            session_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// The shared semaphore for a class+limit pair, created lazily on
    /// first use. The same pair always yields the same instance; a
    /// different limit yields a different instance.
    pub fn semaphore(&self, class: &str, limit: usize) -> Arc<Semaphore> {
        let mut map = self.semaphores.lock().expect("semaphore registry lock");
        map.entry((class.to_string(), limit))
            .or_insert_with(|| {
                debug!(class, limit, "Creating semaphore");
                Arc::new(Semaphore::new(limit))
            })
            .clone()
    }

    /// Acquire a slot, blocking until one frees. The returned permit
    /// releases the slot on drop, on every exit path.
    pub async fn acquire(&self, class: &str, limit: usize) -> OwnedSemaphorePermit {
        let semaphore = self.semaphore(class, limit);
        semaphore
            .acquire_owned()
            .await
            .expect("concurrency semaphore closed")
    }

    /// The exclusive-session mutex: no two channel batch/scan operations
    /// may open the provider session simultaneously, across all job
    /// families.
    pub fn session_lock(&self) -> Arc<AsyncMutex<()>> {
        self.session_lock.clone()
    }

    /// Drain all registered semaphores: waits until every in-flight
    /// permit has been returned, so work finishes before process exit.
    pub async fn shutdown(&self) {
        let semaphores: Vec<(String, usize, Arc<Semaphore>)> = {
            let map = self.semaphores.lock().expect("semaphore registry lock");
            map.iter()
                .map(|((class, limit), sem)| (class.clone(), *limit, sem.clone()))
                .collect()
        };
        for (class, limit, semaphore) in semaphores {
            let _all = semaphore
                .acquire_many_owned(limit as u32)
                .await
                .expect("concurrency semaphore closed");
            debug!(class, limit, "Concurrency class drained");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_class_and_limit_share_one_semaphore() {
        let manager = ConcurrencyManager::new();
        let a = manager.semaphore(CLASS_DOWNLOAD, 3);
        let b = manager.semaphore(CLASS_DOWNLOAD, 3);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_limits_get_distinct_semaphores() {
        let manager = ConcurrencyManager::new();
        let a = manager.semaphore(CLASS_DOWNLOAD, 3);
        let b = manager.semaphore(CLASS_DOWNLOAD, 5);
        assert!(!Arc::ptr_eq(&a, &b));
        let c = manager.semaphore(CLASS_CONVERSION, 3);
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn limit_bounds_simultaneous_permits() {
        let manager = ConcurrencyManager::new();
        let p1 = manager.acquire(CLASS_CONVERSION, 2).await;
        let _p2 = manager.acquire(CLASS_CONVERSION, 2).await;

        // Third acquire must block until a permit drops
        let third = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire(CLASS_CONVERSION, 2),
        )
        .await;
        assert!(third.is_err());

        drop(p1);
        let third = tokio::time::timeout(
            Duration::from_millis(50),
            manager.acquire(CLASS_CONVERSION, 2),
        )
        .await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn shutdown_waits_for_inflight_permits() {
        let manager = Arc::new(ConcurrencyManager::new());
        let permit = manager.acquire(CLASS_DOWNLOAD, 1).await;

        let m = manager.clone();
        let drain = tokio::spawn(async move { m.shutdown().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drain.is_finished());

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), drain)
            .await
            .expect("drain should complete once permits return")
            .unwrap();
    }
}
