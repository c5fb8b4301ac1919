use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Bounded exponential backoff.
///
/// The delay before retry `n` (0-indexed) is
/// `clamp(min_delay * multiplier^n, min_delay, max_delay)`, plus optional
/// random jitter in `0..jitter_secs`.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub multiplier: u32,
    pub min_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            multiplier: 2,
            min_delay_secs: 4,
            max_delay_secs: 60,
            jitter_secs: 0,
        }
    }
}

impl RetryConfig {
    /// Config with no waiting between attempts.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            multiplier: 2,
            min_delay_secs: 0,
            max_delay_secs: 0,
            jitter_secs: 0,
        }
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = u64::from(self.multiplier)
            .checked_pow(retry)
            .unwrap_or(u64::MAX);
        let exp_delay = self.min_delay_secs.saturating_mul(factor);
        let floor = self.min_delay_secs.min(self.max_delay_secs);
        let capped = exp_delay.clamp(floor, self.max_delay_secs);
        let jitter = if self.jitter_secs > 0 {
            rand::thread_rng().gen_range(0..self.jitter_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }
}

/// Run `operation` until it succeeds, the classifier aborts, or
/// `max_attempts` is reached.
///
/// Each attempt reports an explicit `Result`; nothing is retried by
/// unwinding. Returns the first `Ok`, or the last error.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    classifier: C,
    operation: F,
) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation(attempt).await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        if classifier(&err) == RetryAction::Abort || attempt + 1 >= total_attempts {
            return Err(err);
        }
        let delay = config.delay_for_retry(attempt);
        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {}s: {}",
            attempt + 1,
            total_attempts,
            delay.as_secs(),
            err
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
