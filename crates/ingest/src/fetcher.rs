//! HTTP fetcher with minimum-interval pacing and backoff retry.
//!
//! Pacing uses a governor rate limiter whose quota period equals the
//! configured minimum interval, shared across retries of the same logical
//! call, so a retried request still respects the source's pacing.

use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FetchError, Result};
use marketflow_core::SourceSettings;

type DirectLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

/// Outbound HTTP client for one source: paced, retrying, with a fixed
/// per-request timeout.
pub struct RateLimitedFetcher {
    http_client: Client,
    rate_limiter: Arc<DirectLimiter>,
    max_retries: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl RateLimitedFetcher {
    /// Creates a fetcher for a source's settings.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(settings: &SourceSettings) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let period = Duration::from_secs(settings.min_interval_secs.max(1));
        let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(nonzero!(1u32)));

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            max_retries: settings.max_retries,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_cap: Duration::from_millis(settings.backoff_cap_ms),
        })
    }

    /// Performs a GET, retrying transient failures with exponential backoff.
    ///
    /// # Errors
    /// Returns `FetchError::Exhausted` once the retry ceiling is reached,
    /// or the classified error immediately for non-transient failures.
    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Response> {
        let mut attempt: u32 = 0;

        loop {
            self.rate_limiter.until_ready().await;

            match self.send_once(url, query).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    if attempt >= self.max_retries {
                        tracing::error!(url, attempt, error = %e, "request failed");
                        return Err(FetchError::Exhausted {
                            attempts: attempt + 1,
                            last: Box::new(e),
                        });
                    }

                    let backoff = backoff_delay(self.backoff_base, self.backoff_cap, attempt);
                    tracing::warn!(
                        url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "request retry"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(url, error = %e, "request failed");
                    return Err(e);
                }
            }
        }
    }

    /// GET and decode a JSON body.
    ///
    /// # Errors
    /// Returns a fetch error, or `FetchError::Decode` if the body is not
    /// valid JSON for `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self.get(url, query).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// GET and return the body as text.
    ///
    /// # Errors
    /// Returns a fetch error, or `FetchError::Decode` if the body cannot be
    /// read.
    pub async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self.get(url, query).await?;
        response
            .text()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn send_once(&self, url: &str, query: &[(&str, &str)]) -> Result<Response> {
        let response = self.http_client.get(url).query(query).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == 429 {
            Err(FetchError::RateLimited)
        } else if status.is_server_error() {
            Err(FetchError::Server {
                status: status.as_u16(),
            })
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(FetchError::Client {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Backoff for the given attempt: `base * 2^attempt`, capped.
#[must_use]
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_millis(4000));
    }

    #[test]
    fn test_backoff_hits_cap() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, cap, 5), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, cap, 30), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_survives_overflow() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, cap, u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_fetcher_builds_from_settings() {
        let settings = SourceSettings {
            url: "https://example.com".to_string(),
            api_key: None,
            min_interval_secs: 2,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 10_000,
            timeout_secs: 10,
            expects_records: true,
        };
        let fetcher = RateLimitedFetcher::new(&settings).unwrap();
        assert_eq!(fetcher.max_retries, 3);
        assert_eq!(fetcher.backoff_base, Duration::from_millis(500));
    }
}
