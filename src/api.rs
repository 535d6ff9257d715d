//! HTTP page fetching with jittered backoff retry logic.
//!
//! This module provides the network seam used by every scraper. It includes
//! automatic retry logic with exponential-ish backoff and jitter to ride out
//! transient failures of the AMap endpoints.
//!
//! # Architecture
//!
//! The module uses a trait-based design so the retry loop can be exercised
//! without touching the network:
//! - [`PageFetch`]: Core trait defining an async "GET this URL as text"
//! - [`HttpFetcher`]: `reqwest`-backed implementation with a per-request timeout
//! - [`RetryFetch`]: Decorator that adds retry logic to any `PageFetch` implementation
//!
//! # Retry Strategy
//!
//! - At most 3 attempts in total
//! - Delay after failed attempt `a` (0-based) is `1.5^a` seconds
//! - Uniform jitter in `[0.5, 1.5)` seconds added to every delay
//! - No delay after the final attempt; the error is returned immediately

use rand::{Rng, rng};
use std::error::Error;
use std::fmt;
use std::ops::Range;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Trait for fetching a page body as text.
///
/// Implementors treat timeouts, connection errors and non-2xx statuses as
/// errors; any `Ok` body is a successful response.
pub trait PageFetch {
    /// Fetch `url`, sending `user_agent` as the `User-Agent` header.
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, Box<dyn Error>>;
}

/// Backoff schedule for [`RetryFetch`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base of the exponential delay, in seconds.
    pub base_secs: f64,
    /// Uniform jitter range added to every delay, in seconds.
    pub jitter_secs: Range<f64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_secs: 1.5,
            jitter_secs: 0.5..1.5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the 0-based `attempt` failed, for a given jitter.
    pub fn delay_with_jitter(&self, attempt: u32, jitter_secs: f64) -> StdDuration {
        StdDuration::from_secs_f64(self.base_secs.powi(attempt as i32) + jitter_secs)
    }

    /// Delay to wait after the 0-based `attempt` failed, with random jitter.
    pub fn delay(&self, attempt: u32) -> StdDuration {
        let jitter = rng().random_range(self.jitter_secs.clone());
        self.delay_with_jitter(attempt, jitter)
    }
}

/// Wrapper that adds bounded retry logic to any [`PageFetch`] implementation.
///
/// # Backoff Strategy
///
/// ```text
/// delay(attempt) = base ^ attempt + uniform(jitter)
/// ```
pub struct RetryFetch<T> {
    /// The underlying fetcher to wrap.
    inner: T,
    policy: RetryPolicy,
}

impl<T> RetryFetch<T>
where
    T: PageFetch,
{
    /// Create a new retry wrapper around an existing [`PageFetch`] implementation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let http = HttpFetcher::new(Duration::from_secs(10))?;
    /// let retrying = RetryFetch::new(http, RetryPolicy::default());
    /// ```
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("policy", &self.policy)
            .finish()
    }
}

impl<T> PageFetch for RetryFetch<T>
where
    T: PageFetch,
{
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, Box<dyn Error>> {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch(url, user_agent).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt + 1 >= self.policy.max_attempts {
                        error!(
                            attempt = attempt + 1,
                            max = self.policy.max_attempts,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "fetch exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.policy.delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max = self.policy.max_attempts,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "fetch attempt failed; retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// `reqwest`-backed [`PageFetch`] with a fixed per-request timeout.
///
/// Cloning is cheap; the underlying client pools connections.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: StdDuration) -> Result<Self, Box<dyn Error>> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl PageFetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, Box<dyn Error>> {
        let t0 = Instant::now();
        let res = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        let resp = match res {
            Ok(resp) => resp,
            Err(e) => {
                warn!(elapsed_ms = t0.elapsed().as_millis(), error = %e, "HTTP request failed");
                return Err(e.into());
            }
        };
        Ok(resp.text().await?)
    }
}
