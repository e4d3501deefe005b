//! Rate-limited HTTP transport shared by the connectors.

use crate::error::ConnectorError;
use crate::rate_limit::RateLimiter;
use crate::record::SourceTag;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const USER_AGENT: &str = concat!("scholar_core/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Backoff applied when a source answers 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry `attempt`: the server's `Retry-After` seconds when
    /// given, otherwise [`RetryPolicy::backoff`]. Capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32, headers: &HeaderMap) -> Duration {
        retry_after(headers)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// HTTP client bound to one source: every request waits on the shared
/// limiter for the source's domain first.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    limiter: Arc<RateLimiter>,
    tag: SourceTag,
    domain: String,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(
        tag: SourceTag,
        domain: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ConnectorError::Other(e.to_string()))?;

        Ok(Self {
            client,
            limiter,
            tag,
            domain: domain.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Send the request built by `build`, retrying on 429.
    ///
    /// `build` is called once per attempt since a `RequestBuilder` is consumed by `send`.
    pub async fn send<F>(&self, build: F) -> Result<Response, ConnectorError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            self.limiter.acquire(&self.domain).await;
            let response = build(&self.client).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= self.retry.max_retries {
                    warn!(
                        target: "scholar.connector",
                        source = %self.tag,
                        attempts = attempt + 1,
                        "Giving up after repeated 429 responses"
                    );
                    return Err(ConnectorError::RateLimited {
                        tag: self.tag,
                        attempts: attempt + 1,
                    });
                }
                let delay = self.retry.delay_for(attempt, response.headers());
                warn!(
                    target: "scholar.connector",
                    source = %self.tag,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited by upstream, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if !status.is_success() {
                return Err(ConnectorError::Status {
                    tag: self.tag,
                    status: status.as_u16(),
                });
            }

            debug!(
                target: "scholar.connector",
                source = %self.tag,
                status = status.as_u16(),
                "Request succeeded"
            );
            return Ok(response);
        }
    }

    pub async fn get_text<F>(&self, build: F) -> Result<String, ConnectorError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        Ok(self.send(build).await?.text().await?)
    }

    pub async fn get_json<T, F>(&self, build: F) -> Result<T, ConnectorError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let body = self.get_text(build).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Lightweight HEAD request used for liveness probes.
    pub async fn probe(&self, url: &str) -> Result<StatusCode, ConnectorError> {
        self.limiter.acquire(&self.domain).await;
        let response = self
            .client
            .head(url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        Ok(response.status())
    }
}
