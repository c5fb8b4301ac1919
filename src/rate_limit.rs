//! Minimum-interval throttle for catalog listing calls.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Option<Instant>,
    total_requests: u64,
    total_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub total_wait: Duration,
    pub min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: None,
            total_requests: 0,
            total_wait: Duration::ZERO,
        }
    }

    /// Wait until `min_interval` has passed since the previous call.
    ///
    /// Call exactly once immediately before each throttled request. The first
    /// call never waits.
    pub async fn wait_if_needed(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:.2}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
                self.total_wait += wait;
            }
        }
        self.record_request();
    }

    /// Record a request without waiting.
    pub fn record_request(&mut self) {
        self.last_request = Some(Instant::now());
        self.total_requests += 1;
    }

    /// Back off after the provider explicitly throttled us.
    pub async fn handle_rate_limit_error(&mut self, retry_after: Duration) {
        tracing::warn!(
            "Rate limit hit, waiting {}s before retrying",
            retry_after.as_secs()
        );
        tokio::time::sleep(retry_after).await;
        self.total_wait += retry_after;
        self.last_request = Some(Instant::now());
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            total_requests: self.total_requests,
            total_wait: self.total_wait,
            min_interval: self.min_interval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.stats().total_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_waits_remaining_interval() {
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        limiter.wait_if_needed().await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let start = Instant::now();
        limiter.wait_if_needed().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3));
        assert!(waited < Duration::from_secs(4));
        assert_eq!(limiter.stats().total_requests, 2);
        assert!(limiter.stats().total_wait >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_wait_after_interval_elapsed() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.wait_if_needed().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        let start = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.stats().total_wait, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_error_resets_clock() {
        let mut limiter = RateLimiter::new(Duration::from_secs(10));
        limiter.wait_if_needed().await;

        let start = Instant::now();
        limiter.handle_rate_limit_error(Duration::from_secs(30)).await;
        assert!(start.elapsed() >= Duration::from_secs(30));

        // Clock was reset at the end of the back-off, so the next call waits
        // a full interval again.
        let start = Instant::now();
        limiter.wait_if_needed().await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
