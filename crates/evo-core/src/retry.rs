//! Infrastructure retry
//!
//! Only adapter errors classified transient are retried, and only where the
//! pipeline opts in (sandbox provisioning). Evolutionary failures are never
//! retried: a failed attempt is a result, not a fault.

use crate::error::AdapterError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: u32,
    /// Delay before the second try, in milliseconds; doubles after each retry
    pub backoff: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: 250,
        }
    }
}

impl RetryPolicy {
    /// Single try, no retry
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: 0,
        }
    }

    /// Delay after the `try_number`-th failed try (1-based)
    #[must_use]
    pub fn delay(&self, try_number: u32) -> Duration {
        let factor = 1u64 << try_number.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff.saturating_mul(factor))
    }

    /// Run `operation`, retrying transient failures
    ///
    /// # Errors
    /// The last error once it is not transient or tries are exhausted.
    pub async fn run<T, F, Fut>(&self, name: &str, mut operation: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        let max = self.max_attempts.max(1);
        let mut try_number = 1;
        loop {
            match operation().await {
                Err(err) if err.is_transient() && try_number < max => {
                    let delay = self.delay(try_number);
                    tracing::warn!(
                        operation = name,
                        try_number,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retrying transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    try_number += 1;
                }
                result => return result,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: 100,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::default()
            .run("provision", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AdapterError::Transient("pull failed".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::default()
            .run("provision", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Transient("still down".into()))
            })
            .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = RetryPolicy::default()
            .run("provision", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AdapterError::Unavailable("no docker".into()))
            })
            .await;
        assert_eq!(result, Err(AdapterError::Unavailable("no docker".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
