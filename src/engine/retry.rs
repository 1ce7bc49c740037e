//! Bounded retry with exponential backoff
//!
//! One generic loop serves every retried operation (job acquisition,
//! channel item fetch). Retriability is decided by the error type's own
//! classification, never by inspecting message text here.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::extract::ExtractError;

/// Errors that know whether another attempt could help
pub trait RetryClass {
    fn retriable(&self) -> bool;
}

impl RetryClass for ExtractError {
    fn retriable(&self) -> bool {
        ExtractError::retriable(self)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Job acquisition: sleeps min(base * 2^(n-2), cap) seconds before
    /// attempt n. With the default base of 4 that is the classic
    /// min(2^n, 30) curve.
    pub fn acquisition(max_attempts: u32, base_secs: u64, cap_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            first_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(cap_secs),
        }
    }

    /// Channel batch items: 5 s doubling
    pub fn channel(max_attempts: u32, base_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            first_delay: Duration::from_secs(base_secs),
            max_delay: Duration::from_secs(base_secs * 8),
        }
    }

    /// Delay before the given attempt number (2-based; attempt 1 never waits)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let doubled = self
            .first_delay
            .saturating_mul(1u32 << (attempt - 2).min(16));
        doubled.min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retriable error
    Exhausted { attempts: u32, last: E },
    /// A non-retriable error aborted the loop
    NonRetriable { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NonRetriable { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetriable { error, .. } => error,
        }
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "failed after {} attempt(s): {}", attempts, last)
            }
            RetryError::NonRetriable { attempts, error } => {
                write!(f, "aborted on attempt {}: {}", attempts, error)
            }
        }
    }
}

/// Drive `op` for up to `policy.max_attempts` attempts.
///
/// `on_attempt` runs before each attempt (record the attempt number, reset
/// progress). Cleanup of partial output belongs inside `op`'s failure path
/// so it runs for every failed attempt, including the last.
pub async fn with_retry<T, E, F, Fut, H>(
    policy: &RetryPolicy,
    mut on_attempt: H,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: RetryClass + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    H: FnMut(u32),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        on_attempt(attempt);

        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if !error.retriable() => {
                return Err(RetryError::NonRetriable { attempts: attempt, error });
            }
            Err(error) => {
                tracing::warn!(attempt, max = policy.max_attempts, error = %error, "Attempt failed");
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: error });
                }
            }
        }
    }
}
