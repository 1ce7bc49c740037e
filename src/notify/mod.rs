//! Notification sink abstraction
//!
//! Progress updates and terminal/aggregate events are pushed through the
//! [`NotificationSink`] trait. The default sink just logs; tests capture.

use async_trait::async_trait;
use std::sync::Mutex;

/// Events emitted by the engine and coordinators
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    JobProgress {
        job_id: String,
        progress: f32,
    },
    JobFinished {
        job_id: String,
        state: String,
        message: Option<String>,
    },
    /// Exactly one of these per bulk operation, fired by the last unit
    BatchCompleted {
        operation: String,
        total: usize,
        done: usize,
        errors: usize,
    },
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn push(&self, event: Event);
}

/// Default sink: structured log lines
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for TracingSink {
    async fn push(&self, event: Event) {
        match event {
            Event::JobProgress { job_id, progress } => {
                tracing::debug!(job_id, progress, "Job progress")
            }
            Event::JobFinished {
                job_id,
                state,
                message,
            } => {
                tracing::info!(job_id, state, message = message.as_deref().unwrap_or(""), "Job finished")
            }
            Event::BatchCompleted {
                operation,
                total,
                done,
                errors,
            } => {
                tracing::info!(operation, total, done, errors, "Batch completed")
            }
        }
    }
}

/// Capturing sink for tests
#[derive(Debug, Default)]
pub struct MockSink {
    events: Mutex<Vec<Event>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("mock sink lock").clone()
    }
}

#[async_trait]
impl NotificationSink for MockSink {
    async fn push(&self, event: Event) {
        self.events.lock().expect("mock sink lock").push(event);
    }
}
