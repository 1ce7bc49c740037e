//! Progress persistence throttle
//!
//! Every raw progress callback goes through an explicit throttle owned by
//! the worker; an update is persisted only when enough time has passed or
//! the value moved enough, so a fast download does not hammer the store.

use std::time::{Duration, Instant};

/// During the fetch phase progress is capped here; the remaining points
/// belong to post-processing (95..=99) and finalization (100).
pub const DOWNLOAD_PHASE_CAP: f32 = 94.0;

/// Values at or past this always pass the throttle so the finish is never
/// reported late.
const NEAR_FINISH: f32 = 93.0;

#[derive(Debug)]
pub struct ProgressThrottle {
    min_interval: Duration,
    min_delta: f32,
    last_time: Option<Instant>,
    last_value: f32,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration, min_delta: f32) -> Self {
        Self {
            min_interval,
            min_delta,
            last_time: None,
            last_value: 0.0,
        }
    }

    pub fn from_config(config: &crate::config::ProgressConfig) -> Self {
        Self::new(
            Duration::from_secs(config.min_interval_secs),
            config.min_delta_pct,
        )
    }

    /// Reset between attempts so the first update of a new attempt is
    /// always persisted.
    pub fn reset(&mut self) {
        self.last_time = None;
        self.last_value = 0.0;
    }

    /// Whether this value should be persisted. Updates internal state on
    /// admission.
    pub fn admit(&mut self, value: f32) -> bool {
        let now = Instant::now();
        let due = match self.last_time {
            None => true,
            Some(last) => {
                now.duration_since(last) >= self.min_interval
                    || (value - self.last_value) >= self.min_delta
                    || value >= NEAR_FINISH
            }
        };
        if due {
            self.last_time = Some(now);
            self.last_value = value;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> ProgressThrottle {
        ProgressThrottle::new(Duration::from_secs(3), 5.0)
    }

    #[test]
    fn first_update_always_admitted() {
        let mut t = throttle();
        assert!(t.admit(0.5));
    }

    #[test]
    fn small_fast_updates_are_dropped() {
        let mut t = throttle();
        assert!(t.admit(10.0));
        assert!(!t.admit(11.0));
        assert!(!t.admit(14.9));
    }

    #[test]
    fn delta_threshold_admits() {
        let mut t = throttle();
        assert!(t.admit(10.0));
        assert!(t.admit(15.0));
        assert!(!t.admit(16.0));
        assert!(t.admit(20.5));
    }

    #[test]
    fn near_finish_always_passes() {
        let mut t = throttle();
        assert!(t.admit(90.0));
        assert!(t.admit(93.0));
        assert!(t.admit(93.5));
        assert!(t.admit(94.0));
    }

    #[test]
    fn reset_readmits_first_update() {
        let mut t = throttle();
        assert!(t.admit(50.0));
        assert!(!t.admit(51.0));
        t.reset();
        assert!(t.admit(0.0));
    }

    #[test]
    fn interval_admits_after_wait() {
        let mut t = ProgressThrottle::new(Duration::from_millis(0), 100.0);
        assert!(t.admit(1.0));
        // Zero interval means time criterion is always satisfied
        assert!(t.admit(1.1));
    }
}
