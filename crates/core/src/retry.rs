//! Retry with backoff for calls that fail transiently.

use std::{fmt::Display, future::Future, time::Duration};

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * factor^(retry - 1)`
    Exponential { base: Duration, factor: u32 },
    Constant(Duration),
}

impl Backoff {
    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Exponential { base, factor } => {
                let multiplier = factor.saturating_pow(retry.saturating_sub(1));
                base.saturating_mul(multiplier)
            }
            Backoff::Constant(delay) => delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                factor: 2,
            },
        }
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier said the error is not worth retrying.
    Permanent(E),
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently or runs out of retries.
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, Op, Fut, C>(&self, is_retryable: C, op: Op) -> Result<T, RetryError<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        self.run_with_sleep(is_retryable, op, tokio::time::sleep)
            .await
    }

    /// Same as [`RetryPolicy::run`] with a caller-supplied sleep.
    pub async fn run_with_sleep<T, E, Op, Fut, C, S, SFut>(
        &self,
        is_retryable: C,
        mut op: Op,
        mut sleep: S,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
        S: FnMut(Duration) -> SFut,
        SFut: Future<Output = ()>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_retryable(&error) {
                return Err(RetryError::Permanent(error));
            }
            if attempt > self.max_retries {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.backoff.delay(attempt);
            warn!(attempt, ?delay, %error, "Retryable failure, backing off");
            sleep(delay).await;
        }
    }
}
