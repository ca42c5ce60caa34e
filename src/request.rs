use std::time::Duration;

use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use tokio::time::sleep;
use tracing::warn;

use crate::Result;

/// Bounded retry settings for one logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry ceiling, counting the first attempt.
    pub max_attempts: u32,
    /// Transport failures sleep `backoff_base * 2^retry_index`.
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
        }
    }

    /// Delay after a 429: the server's `Retry-After`, else `retry_index + 1` seconds.
    pub fn rate_limit_delay(retry: u32, retry_after: Option<u64>) -> Duration {
        Duration::from_secs(retry_after.unwrap_or(u64::from(retry) + 1))
    }

    pub fn backoff_delay(&self, retry: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Why a request gave up without a usable body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// A status other than 200/429. Never retried.
    Rejected(StatusCode),
    /// Every attempt was rate limited or failed in transport.
    Exhausted { attempts: u32 },
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Rejected(status) => write!(f, "rejected with {status}"),
            Failure::Exhausted { attempts } => write!(f, "gave up after {attempts} attempts"),
        }
    }
}

enum Reply<T> {
    Body(T),
    RateLimited(Option<u64>),
    Status(StatusCode),
}

/// The remote dataset. Shared by every concurrent request.
#[derive(Debug, Clone)]
pub struct Endpoint {
    client: Client,
    base_url: String,
}

impl Endpoint {
    /// Every request through this endpoint is cut off after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issues `GET base_url?query` until it yields a decodable 200 body, a terminal status,
    /// or the retry ceiling is hit. `what` only labels the log lines.
    pub(crate) async fn get_with_retry<T, F>(
        &self,
        what: &str,
        query: &[(&str, String)],
        policy: RetryPolicy,
        decode: F,
    ) -> core::result::Result<T, Failure>
    where
        F: Fn(&[u8]) -> Result<T>,
    {
        for retry in 0..policy.max_attempts {
            let is_last = retry + 1 == policy.max_attempts;
            match self.attempt(query, &decode).await {
                Ok(Reply::Body(value)) => return Ok(value),
                Ok(Reply::RateLimited(retry_after)) => {
                    let delay = RetryPolicy::rate_limit_delay(retry, retry_after);
                    warn!(
                        attempt = retry + 1,
                        retry_after_secs = delay.as_secs(),
                        "Rate limited while fetching {what}"
                    );
                    if !is_last {
                        sleep(delay).await;
                    }
                }
                Ok(Reply::Status(status)) => {
                    warn!(%status, "Error while fetching {what}");
                    return Err(Failure::Rejected(status));
                }
                Err(err) => {
                    let delay = policy.backoff_delay(retry);
                    warn!(
                        attempt = retry + 1,
                        error = %err,
                        backoff_ms = delay.as_millis() as u64,
                        "Request for {what} failed"
                    );
                    if !is_last {
                        sleep(delay).await;
                    }
                }
            }
        }
        warn!(
            attempts = policy.max_attempts,
            "Failed to fetch {what} after multiple retries"
        );
        Err(Failure::Exhausted {
            attempts: policy.max_attempts,
        })
    }

    async fn attempt<T, F>(&self, query: &[(&str, String)], decode: &F) -> Result<Reply<T>>
    where
        F: Fn(&[u8]) -> Result<T>,
    {
        let res = self.client.get(&self.base_url).query(query).send().await?;
        match res.status() {
            StatusCode::OK => {
                let body = res.bytes().await?;
                Ok(Reply::Body(decode(&body)?))
            }
            StatusCode::TOO_MANY_REQUESTS => Ok(Reply::RateLimited(retry_after_secs(&res))),
            status => Ok(Reply::Status(status)),
        }
    }
}

/// `Retry-After` as integer seconds. HTTP dates and garbage count as absent.
fn retry_after_secs(res: &Response) -> Option<u64> {
    res.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
