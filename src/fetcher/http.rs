//! Retrying HTTP client
//!
//! Every request:
//! - takes a token from the shared [`RateLimiter`]
//! - retries network errors and non-2xx statuses with exponential backoff and jitter
//! - treats 429 separately: throttle the limiter, wait `Retry-After` (or the
//!   configured default) and try again without spending a retry
//! - recovers the limiter on success and optionally sleeps a politeness delay

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::fetcher::{FetcherError, FetcherResult};
use crate::harvester::config::{calculate_backoff, jittered, HttpConfig};
use crate::harvester::rate_limit::{RateLimiter, RECOVER_FACTOR, THROTTLE_FACTOR};

/// HTTP client shared by every fetch
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    config: HttpConfig,
}

impl FetchClient {
    /// Build a client with the configured timeout and User-Agent
    pub fn new(config: HttpConfig, rate_limiter: Arc<RateLimiter>) -> FetcherResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetcherError::HttpError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// Shared rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Client configuration
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// GET `url` and return the successful response
    ///
    /// `polite` applies the post-success politeness delay.
    pub async fn get(
        &self,
        url: &str,
        params: &[(&str, String)],
        polite: bool,
    ) -> FetcherResult<Response> {
        let mut retries = 0u32;
        let mut rate_limit_waits = 0u32;

        loop {
            self.rate_limiter.acquire().await;

            let failure = match self.client.get(url).query(params).send().await {
                Ok(response) if response.status().is_success() => {
                    crate::metrics::record_http_request(Some(response.status().as_u16()));
                    self.rate_limiter.recover(RECOVER_FACTOR);
                    debug!(url, attempt = retries + 1, "Request succeeded");
                    if polite {
                        let delay = self.config.politeness_delay();
                        if !delay.is_zero() {
                            sleep(delay).await;
                        }
                    }
                    return Ok(response);
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    crate::metrics::record_http_request(Some(429));
                    crate::metrics::record_rate_limited();

                    if rate_limit_waits >= self.config.max_rate_limit_waits {
                        warn!(url, waits = rate_limit_waits, "Giving up after repeated rate limiting");
                        return Err(FetcherError::RateLimitExceeded {
                            waits: rate_limit_waits,
                        });
                    }
                    rate_limit_waits += 1;

                    self.rate_limiter.throttle(THROTTLE_FACTOR);
                    let advised = retry_after(&response).unwrap_or(self.config.rate_limit_wait);
                    let wait = jittered(advised, self.config.jitter);
                    warn!(
                        url,
                        wait_ms = wait.as_millis() as u64,
                        waits = rate_limit_waits,
                        "Rate limited (429), waiting before retry"
                    );
                    sleep(wait).await;
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    crate::metrics::record_http_request(Some(status.as_u16()));
                    format!("HTTP {status}")
                }
                Err(e) => {
                    crate::metrics::record_http_request(None);
                    FetcherError::NetworkError(e.to_string()).to_string()
                }
            };
            // Only consecutive 429s count towards the wait cap.
            rate_limit_waits = 0;

            if retries >= self.config.max_retries {
                warn!(
                    url,
                    attempts = retries + 1,
                    error = %failure,
                    "Retries exhausted"
                );
                return Err(FetcherError::TransientFailure {
                    attempts: retries + 1,
                    message: failure,
                });
            }

            let backoff = jittered(
                calculate_backoff(retries, self.config.initial_backoff, self.config.max_backoff),
                self.config.jitter,
            );
            retries += 1;
            crate::metrics::record_retry_backoff(backoff, retries);
            warn!(
                url,
                attempt = retries,
                max_retries = self.config.max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "Request failed, retrying"
            );
            sleep(backoff).await;
        }
    }

    /// GET `url` and return the body as text
    pub async fn get_text(
        &self,
        url: &str,
        params: &[(&str, String)],
        polite: bool,
    ) -> FetcherResult<String> {
        self.get(url, params, polite)
            .await?
            .text()
            .await
            .map_err(|e| FetcherError::HttpError(format!("Failed to read response body: {e}")))
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T>(
        &self,
        url: &str,
        params: &[(&str, String)],
        polite: bool,
    ) -> FetcherResult<T>
    where
        T: DeserializeOwned,
    {
        self.get(url, params, polite)
            .await?
            .json::<T>()
            .await
            .map_err(|e| FetcherError::ParseError(format!("Failed to deserialize response: {e}")))
    }
}

/// Server-advised wait from an integer `Retry-After` header
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
