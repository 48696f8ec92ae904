use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{CancelStage, Error, Result};

/// Permit for exactly one call attempt. Consumed on acquisition; nothing is
/// handed back to the bucket when it is dropped.
#[derive(Debug)]
#[must_use = "a rate token authorizes one attempt"]
pub struct RateToken {
    _private: (),
}

/// Token bucket holding at most `capacity` permits, refilled one at a time
/// every `1s / capacity` by a background task.
///
/// The bucket starts full. Refill ticks that land on a full bucket are
/// dropped. The refill task runs until [`TokenBucket::close`] is called or
/// the bucket is dropped.
#[derive(Debug)]
pub struct TokenBucket {
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl TokenBucket {
    /// Creates a full bucket and starts its refill task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(calls_per_second: u32) -> Result<Self> {
        if calls_per_second == 0 {
            return Err(Error::Config(
                "rate limit must be at least 1 call per second".to_owned(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Config("rate limiter requires a Tokio runtime".to_owned()))?;

        let capacity = calls_per_second as usize;
        let period = (Duration::from_secs(1) / calls_per_second).max(Duration::from_nanos(1));
        let permits = Arc::new(Semaphore::new(capacity));
        let shutdown = CancellationToken::new();

        runtime.spawn(refill(
            Arc::clone(&permits),
            capacity,
            period,
            shutdown.clone(),
        ));

        Ok(Self { permits, shutdown })
    }

    /// Waits for a permit, or for `cancel` to fire.
    ///
    /// Acquisition is first-ready-wins between concurrent callers.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<RateToken> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { stage: CancelStage::TokenWait }),
            permit = self.permits.acquire() => {
                let permit = permit.map_err(|_| Error::Closed)?;
                permit.forget();
                Ok(RateToken { _private: () })
            }
        }
    }

    /// Takes a permit only if one is available right now.
    pub fn try_acquire(&self) -> Option<RateToken> {
        let permit = self.permits.try_acquire().ok()?;
        permit.forget();
        Some(RateToken { _private: () })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stops the refill task and fails current and future acquisitions
    /// with [`Error::Closed`].
    pub fn close(&self) {
        self.shutdown.cancel();
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn refill(
    permits: Arc<Semaphore>,
    capacity: usize,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(capacity, period = ?period, "rate limiter refill started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // Only this task adds permits, so the check cannot race with
                // another refill; acquirers can only lower the count.
                if permits.available_permits() < capacity {
                    permits.add_permits(1);
                }
            }
        }
    }

    tracing::debug!("rate limiter refill stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_capacity_fails_fast() {
        let err = TokenBucket::new(0).expect_err("zero capacity must be rejected");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn construction_outside_runtime_is_an_error() {
        assert!(matches!(TokenBucket::new(1), Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn starts_full_and_admits_a_burst() {
        let bucket = TokenBucket::new(3).expect("bucket");
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..3 {
            let _token = bucket.acquire(&cancel).await.expect("token");
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_excess_calls_at_the_refill_rate() {
        let bucket = TokenBucket::new(2).expect("bucket");
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut admitted = Vec::new();
        for _ in 0..5 {
            let _token = bucket.acquire(&cancel).await.expect("token");
            admitted.push(start.elapsed());
        }

        assert_eq!(admitted[0], Duration::ZERO);
        assert_eq!(admitted[1], Duration::ZERO);
        for (index, expected_ms) in [(2usize, 500u64), (3, 1_000), (4, 1_500)] {
            let at = admitted[index];
            assert!(
                at >= Duration::from_millis(expected_ms)
                    && at < Duration::from_millis(expected_ms + 50),
                "call {index} admitted at {at:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(4).expect("bucket");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bucket.available(), 4);

        let _token = bucket.try_acquire().expect("token");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(bucket.available(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_token_wait() {
        let bucket = TokenBucket::new(1).expect("bucket");
        let _drained = bucket.try_acquire().expect("initial token");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = bucket.acquire(&cancel).await.expect_err("must be cancelled");
        assert!(matches!(
            err,
            Error::Cancelled {
                stage: CancelStage::TokenWait
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_refill() {
        let metrics = tokio::runtime::Handle::current().metrics();
        let bucket = TokenBucket::new(4).expect("bucket");
        for _ in 0..4 {
            let _token = bucket.try_acquire().expect("token");
        }
        assert_eq!(metrics.num_alive_tasks(), 1);

        bucket.close();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(bucket.available(), 0);
        assert_eq!(metrics.num_alive_tasks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_rejects_waiters() {
        let bucket = Arc::new(TokenBucket::new(1).expect("bucket"));
        let _drained = bucket.try_acquire().expect("initial token");

        let waiter = {
            let bucket = Arc::clone(&bucket);
            tokio::spawn(async move { bucket.acquire(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        bucket.close();

        let result = waiter.await.expect("waiter task");
        assert!(matches!(result, Err(Error::Closed)));
        assert!(bucket.is_closed());
        assert!(bucket.try_acquire().is_none());
    }
}
