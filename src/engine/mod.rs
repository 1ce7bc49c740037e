//! Orchestration core
//!
//! The concurrency limiter, retry controller, preflight checks, progress
//! throttle, bounded batch pool, orphan reclaimer and the job runner that
//! ties them together.

pub mod batch;
pub mod concurrency;
pub mod preflight;
pub mod progress;
pub mod reclaim;
pub mod retry;
pub mod runner;

pub use batch::{BatchSummary, BatchTracker, run_pool};
pub use concurrency::{
    CLASS_CHANNEL_BATCH, CLASS_CONVERSION, CLASS_DOWNLOAD, ConcurrencyManager,
};
pub use preflight::{PreflightError, check_free_space, ensure_dir_writable, resolve_inside_root};
pub use progress::{DOWNLOAD_PHASE_CAP, ProgressThrottle};
pub use reclaim::{ORPHAN_MESSAGE, ReclaimReport, reclaim_orphans};
pub use retry::{RetryClass, RetryError, RetryPolicy, with_retry};
pub use runner::{Engine, EngineError, NewJob, StartOutcome};
