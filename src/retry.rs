//! Bounded-attempt execution with exponential backoff.

use crate::error::SyncError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Tuning for [`RetryEngine`]. Delays grow as
/// `base_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Perturb each delay by up to ±10% to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10000),
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

/// Runs fallible async operations with bounded retries. Waiting is a
/// cooperative `tokio::time::sleep`, so any number of engines can back off
/// concurrently without blocking each other.
#[derive(Debug, Clone, Default)]
pub struct RetryEngine {
    options: RetryOptions,
}

impl RetryEngine {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Pre-jitter delay for a 1-based attempt index.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let raw = self.options.base_delay.as_millis() as f64
            * self.options.backoff_factor.powi(exponent as i32);
        let capped = raw.min(self.options.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.options.jitter {
            return delay;
        }
        let millis = delay.as_millis() as f64;
        let factor: f64 = rand::thread_rng().gen_range(-0.1..=0.1);
        Duration::from_millis((millis + millis * factor).max(0.0) as u64)
    }

    /// Attempts `operation` up to `max_attempts` times. A failure is retried
    /// only while attempts remain and `retry_if` accepts the error; otherwise
    /// it propagates to the caller unchanged — never swallowed.
    pub async fn execute<T, E, F, Fut, P>(&self, mut operation: F, retry_if: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !retry_if(&error) {
                        return Err(error);
                    }
                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    log::debug!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// [`RetryEngine::execute`] with the default retry condition:
    /// connectivity failures, HTTP 5xx, 408 and 429.
    pub async fn execute_default<T, F, Fut>(&self, operation: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.execute(operation, SyncError::is_retryable).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_without_jitter() -> RetryEngine {
        RetryEngine::new(RetryOptions {
            jitter: false,
            ..RetryOptions::default()
        })
    }

    #[test]
    fn test_backoff_sequence() {
        let engine = engine_without_jitter();
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| engine.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10000, 10000]);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let engine = RetryEngine::new(RetryOptions::default());
        for _ in 0..100 {
            let jittered = engine.jittered(Duration::from_millis(1000)).as_millis() as i64;
            assert!(
                (900..=1100).contains(&jittered),
                "jittered delay {}ms outside ±10%",
                jittered
            );
        }
    }

    #[test]
    fn test_huge_attempt_index_is_capped() {
        let engine = engine_without_jitter();
        assert_eq!(
            engine.delay_for_attempt(u32::MAX),
            Duration::from_millis(10000)
        );
    }
}
