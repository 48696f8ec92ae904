use std::future::Future;
use std::time::Duration;

use reqwest::Method;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{classify::is_retryable, CallError, CancelStage, Error, Result, TokenBucket};

/// Fixed-delay retry settings for one logical call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total attempts a permanently failing retryable call will make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Drives `attempt` until it succeeds, fails non-retryably, or the policy is
/// exhausted.
///
/// Each attempt first takes a token from `limiter`. Waiting for a token, the
/// attempt itself and the delay between attempts all end early with
/// [`Error::Cancelled`] once `cancel` fires.
pub(crate) async fn run<T, F, Fut>(
    limiter: &TokenBucket,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    method: &Method,
    url: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CallError>>,
{
    let started = Instant::now();
    let mut number = 0u32;
    loop {
        number += 1;
        let _token = limiter.acquire(cancel).await?;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { stage: CancelStage::Request });
            }
            outcome = attempt() => outcome,
        };

        let err = match outcome {
            Ok(value) => {
                tracing::debug!(
                    %method,
                    url,
                    attempt = number,
                    elapsed = ?started.elapsed(),
                    "upstream request succeeded"
                );
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            tracing::error!(
                %method,
                url,
                attempt = number,
                elapsed = ?started.elapsed(),
                status = err.status,
                error = %err,
                "non-retryable upstream error, giving up"
            );
            return Err(Error::Call(err));
        }

        if number >= policy.max_attempts() {
            tracing::error!(
                %method,
                url,
                attempts = number,
                elapsed = ?started.elapsed(),
                status = err.status,
                error = %err,
                "upstream retries exhausted"
            );
            return Err(Error::Exhausted {
                attempts: number,
                last: err,
            });
        }

        tracing::warn!(
            %method,
            url,
            attempt = number,
            delay_ms = policy.delay.as_millis() as u64,
            status = err.status,
            error = %err,
            "upstream request failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled { stage: CancelStage::RetryDelay });
            }
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}
