//! Minimum-interval request pacing
//!
//! Every outgoing page request (including retries) goes through a single
//! shared [`RateLimiter`]. Grants are serialized behind a mutex, so two
//! granted requests are never closer together than `1 / requests_per_second`.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_granted: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Non-positive or non-finite rates disable pacing
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::try_from_secs_f64(1.0 / requests_per_second).unwrap_or(Duration::ZERO)
        } else {
            Duration::ZERO
        };
        Self::with_interval(min_interval)
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_granted: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be sent. The first call returns immediately.
    pub async fn wait(&self) {
        let mut last = self.last_granted.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                trace!(delay_ms = (ready_at - Instant::now()).as_millis() as u64, "Pacing request");
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_interval_from_rate() {
        assert_eq!(RateLimiter::new(4.0).min_interval(), Duration::from_millis(250));
        assert_eq!(RateLimiter::new(0.0).min_interval(), Duration::ZERO);
        assert_eq!(RateLimiter::new(f64::INFINITY).min_interval(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_grant_is_immediate() {
        let limiter = RateLimiter::new(1.0);
        let start = Instant::now();
        limiter.wait().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_grants_are_spaced() {
        let limiter = RateLimiter::new(4.5);
        let interval = limiter.min_interval();

        let mut grants = Vec::new();
        for _ in 0..5 {
            limiter.wait().await;
            grants.push(Instant::now());
        }

        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_time_counts_toward_interval() {
        let limiter = RateLimiter::new(2.0);
        limiter.wait().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let before = Instant::now();
        limiter.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_the_pace() {
        let limiter = Arc::new(RateLimiter::new(10.0));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait().await;
                Instant::now()
            }));
        }

        let mut grants = Vec::new();
        for handle in handles {
            grants.push(handle.await.unwrap());
        }
        grants.sort();

        assert!(grants[3] - start >= Duration::from_millis(300));
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }
}
