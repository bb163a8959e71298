//! Single-page fetch with pacing, retry and backoff

use super::classify::{classify, Attempt};
use super::endpoints::{CustomersEndpoint, CUSTOMERS_KEY};
use super::transport::PageTransport;
use crate::rate_limit::RateLimiter;
use async_trait::async_trait;
use loyalty_common::Page;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Final result of fetching one page, after retries
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Page),
    /// Attempts exhausted; the page may still succeed later
    RetryableFailure(String),
    /// Retrying cannot help
    FatalFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Linear backoff base: attempt `n` is followed by `n * retry_delay`
    pub retry_delay: Duration,
    /// 429 waits allowed per page; these do not consume attempts
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            max_rate_limit_waits: 20,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }

    /// `Retry-After` when the server sent one, else twice the base delay
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.retry_delay.saturating_mul(2))
    }
}

/// Anything the pagination driver can pull pages from
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, cursor: Option<&str>) -> FetchOutcome;
}

#[async_trait]
impl<'a, S: PageSource + ?Sized> PageSource for &'a S {
    async fn fetch(&self, cursor: Option<&str>) -> FetchOutcome {
        (**self).fetch(cursor).await
    }
}

#[async_trait]
impl<S: PageSource + ?Sized> PageSource for Arc<S> {
    async fn fetch(&self, cursor: Option<&str>) -> FetchOutcome {
        (**self).fetch(cursor).await
    }
}

pub struct PageFetcher<T> {
    transport: T,
    limiter: Arc<RateLimiter>,
    endpoint: CustomersEndpoint,
    policy: RetryPolicy,
    records_key: String,
}

impl<T: PageTransport> PageFetcher<T> {
    pub fn new(
        transport: T,
        limiter: Arc<RateLimiter>,
        endpoint: CustomersEndpoint,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            endpoint,
            policy,
            records_key: CUSTOMERS_KEY.to_string(),
        }
    }
}

#[async_trait]
impl<T: PageTransport> PageSource for PageFetcher<T> {
    async fn fetch(&self, cursor: Option<&str>) -> FetchOutcome {
        let url = self.endpoint.page_url(cursor);
        let max_attempts = self.policy.max_attempts();
        let mut attempt: u32 = 1;
        let mut rate_limit_waits: u32 = 0;

        loop {
            self.limiter.wait().await;
            debug!(attempt, url = %url, "Fetching page");

            let reason = match self.transport.get(&url).await {
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Page request cannot be sent");
                    return FetchOutcome::FatalFailure(e.to_string());
                },
                Err(e) => e.to_string(),
                Ok(response) => match classify(&response, &self.records_key) {
                    Attempt::Page(page) => return FetchOutcome::Success(page),
                    Attempt::RateLimited(retry_after) => {
                        rate_limit_waits += 1;
                        if rate_limit_waits > self.policy.max_rate_limit_waits {
                            warn!(waits = rate_limit_waits - 1, "Rate limit persisted, giving up on page");
                            return FetchOutcome::RetryableFailure(format!(
                                "rate limited {} times in a row",
                                rate_limit_waits
                            ));
                        }
                        let wait = self.policy.rate_limit_wait(retry_after);
                        info!(wait_secs = wait.as_secs_f64(), attempt, "Rate limited (429), waiting");
                        sleep(wait).await;
                        continue;
                    },
                    Attempt::Retry(reason) => reason,
                },
            };

            warn!(attempt, max_attempts, %reason, "Page fetch attempt failed");
            if attempt >= max_attempts {
                return FetchOutcome::RetryableFailure(format!(
                    "{} (after {} attempts)",
                    reason, attempt
                ));
            }

            let delay = self.policy.backoff(attempt);
            debug!(delay_secs = delay.as_secs_f64(), "Retrying page");
            sleep(delay).await;
            attempt += 1;
        }
    }
}
