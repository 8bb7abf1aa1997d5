use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before attempt `attempt + 1`, capped and jittered
    /// into the upper half of the window.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let ceiling = exp.min(self.max_backoff);
        if ceiling.is_zero() {
            return ceiling;
        }
        let half = ceiling / 2;
        let jitter = rand::thread_rng().gen_range(0..=half.as_micros() as u64);
        half + Duration::from_micros(jitter)
    }

    /// Runs `op` until it succeeds, fails with something other than
    /// `Conflict`, or the attempt budget is spent. Returns the final result
    /// together with the number of attempts made.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> (Result<T, StoreError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Err(StoreError::Conflict) if attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    log::debug!("write conflict on attempt {attempt}, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                result => return (result, attempt),
            }
        }
    }
}
