use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How often a rate request is repeated after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: usize,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Used for the daily rate fetch.
    pub const RATE_REQUEST: RetryPolicy = RetryPolicy {
        retries: 3,
        delay: Duration::from_millis(500),
    };
}

/// Failures worth another attempt. HTTP statuses come back as responses and
/// are judged by the caller.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Sends the request built by `send`, retrying transient failures per `policy`.
pub async fn with_retry<F, Fut, T>(mut send: F, policy: RetryPolicy) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match send().await {
            Ok(val) => return Ok(val),
            Err(err) if attempt > policy.retries || !is_transient(&err) => {
                return Err(err).with_context(|| format!("Gave up after {attempt} attempt(s)"));
            }
            Err(err) => {
                debug!(attempt, retries = policy.retries, "Rate request failed: {}", err);
                attempt += 1;
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}
