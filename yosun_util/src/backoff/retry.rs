use crate::{Backoff, BackoffConfig};
use std::fmt::{Display, Formatter};
use std::future::Future;

/// Runs a fallible asynchronous operation up to a fixed number of attempts,
/// sleeping with an exponential [`Backoff`] between consecutive attempts.
///
/// The policy itself is stateless: every [`run`](RetryPolicy::run) starts a
/// fresh backoff sequence, so one policy may be shared between concurrent
/// callers.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffConfig,
}

/// The final error of an operation that failed on every attempt allowed by a
/// [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted<E> {
    /// How many attempts were made in total.
    pub attempts: u32,
    /// The error returned by the last attempt.
    pub error: E,
}

impl RetryPolicy {
    /// Creates a policy that makes at most `max_attempts` attempts (at least
    /// one attempt is always made).
    pub fn new(max_attempts: u32, backoff: BackoffConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Creates a policy that makes exactly one attempt.
    pub fn once() -> Self {
        Self::new(1, BackoffConfig::brisk())
    }

    /// Reports the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Exposes the backoff configuration used between attempts.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Calls `operation` with the 1-based attempt number until it succeeds or
    /// the attempts run out. Returns the first success, or the error of the
    /// last attempt wrapped in [`Exhausted`].
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(operation, |_| true).await
    }

    /// Same as [`run`](RetryPolicy::run), but stops right away on an error
    /// for which `retryable` returns `false`.
    pub async fn run_if<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        retryable: R,
    ) -> Result<T, Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
    {
        let backoff = Backoff::new(&self.backoff);
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= self.max_attempts || !retryable(&error) => {
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                Err(_) => {
                    attempt += 1;
                    backoff.sleep_next().await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, BackoffConfig::brisk())
    }
}

impl<E> Display for Exhausted<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "gave up after {} attempt(s): {}", self.attempts, self.error)
    }
}

impl<E> std::error::Error for Exhausted<E> where E: std::error::Error {}
