//! Bounded worker pool for bulk operations
//!
//! "Apply operation X to each of N selected items" actions run through a
//! fixed-size pool: launching 500 items never spawns 500 tasks. A shared
//! [`BatchTracker`] counts completions and identifies the last unit so
//! exactly one aggregate notification fires per batch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub done: usize,
    pub errors: usize,
}

#[derive(Debug, Default)]
struct Counts {
    done: usize,
    errors: usize,
}

/// Shared completion counter for one fire-and-forget bulk operation
#[derive(Debug)]
pub struct BatchTracker {
    total: usize,
    counts: Mutex<Counts>,
}

impl BatchTracker {
    pub fn new(total: usize) -> Arc<Self> {
        Arc::new(Self {
            total,
            counts: Mutex::new(Counts::default()),
        })
    }

    /// Record one finished unit. Returns the summary exactly once: when
    /// this unit was the last.
    pub fn record(&self, success: bool) -> Option<BatchSummary> {
        let mut counts = self.counts.lock().expect("batch tracker lock");
        if success {
            counts.done += 1;
        } else {
            counts.errors += 1;
        }
        if counts.done + counts.errors == self.total {
            Some(BatchSummary {
                total: self.total,
                done: counts.done,
                errors: counts.errors,
            })
        } else {
            None
        }
    }
}

/// Run `op` over `items` with at most `max_workers` concurrent tasks.
///
/// Each worker pulls from a shared queue until it drains; `op` returns
/// whether the unit succeeded. Resolves once every item has finished.
pub async fn run_pool<T, F, Fut>(items: Vec<T>, max_workers: usize, op: F) -> BatchSummary
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = bool> + Send,
{
    let total = items.len();
    let tracker = BatchTracker::new(total);
    if total == 0 {
        return BatchSummary {
            total: 0,
            done: 0,
            errors: 0,
        };
    }

    let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<T>>()));
    let workers = max_workers.max(1).min(total);

    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = queue.clone();
        let tracker = tracker.clone();
        let op = op.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let item = queue.lock().expect("batch queue lock").pop_front();
                let Some(item) = item else { break };
                let success = op(item).await;
                tracker.record(success);
            }
        }));
    }
    for handle in handles {
        // A panicked worker loses its current item but must not hang the batch
        let _ = handle.await;
    }

    let counts = tracker.counts.lock().expect("batch tracker lock");
    BatchSummary {
        total,
        done: counts.done,
        errors: counts.errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn tracker_fires_once_on_last_unit() {
        let tracker = BatchTracker::new(3);
        assert!(tracker.record(true).is_none());
        assert!(tracker.record(false).is_none());
        let summary = tracker.record(true).expect("last unit yields summary");
        assert_eq!(
            summary,
            BatchSummary {
                total: 3,
                done: 2,
                errors: 1
            }
        );
    }

    #[tokio::test]
    async fn pool_processes_everything() {
        let summary = run_pool((0..20).collect(), 4, |n: i32| async move { n % 3 != 0 }).await;
        assert_eq!(summary.total, 20);
        assert_eq!(summary.errors, 7); // 0,3,6,9,12,15,18
        assert_eq!(summary.done, 13);
    }

    #[tokio::test]
    async fn pool_never_exceeds_worker_limit() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let live2 = live.clone();
        let peak2 = peak.clone();
        let summary = run_pool((0..30).collect::<Vec<i32>>(), 3, move |_| {
            let live = live2.clone();
            let peak = peak2.clone();
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                true
            }
        })
        .await;

        assert_eq!(summary.done, 30);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_batch_resolves_immediately() {
        let summary = run_pool(Vec::<i32>::new(), 4, |_| async { true }).await;
        assert_eq!(summary.total, 0);
    }
}
