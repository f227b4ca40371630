//! Bounded exponential-backoff retries around network calls.
//!
//! The policy knows nothing about HTTP: each call site hands it a predicate
//! deciding which errors are worth another attempt (see [`retry_on`]).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Suspends the current task. Injected so tests can observe every wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
  async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
  async fn sleep(&self, duration: Duration) {
    tokio::time::sleep(duration).await
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts, including the first one
  pub max_attempts: u32,
  pub min_backoff:  Duration,
  pub max_backoff:  Duration
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      min_backoff:  Duration::from_secs(1),
      max_backoff:  Duration::from_secs(30)
    }
  }
}

impl RetryPolicy {
  /// Delay after the failed attempt number `attempt` (starting at 1):
  /// `min(max_backoff, min_backoff * 2^(attempt - 1))`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    self
      .min_backoff
      .checked_mul(factor)
      .unwrap_or(self.max_backoff)
      .min(self.max_backoff)
  }

  /// Runs `operation` until it succeeds, fails with an error `is_retryable`
  /// rejects, or `max_attempts` is reached.
  ///
  /// Non-retryable errors are returned unchanged. Running out of attempts
  /// returns [`Error::RetryExhausted`] wrapping the last error.
  pub async fn run<T, F, Fut, P>(&self, sleeper: &dyn Sleeper, is_retryable: P, mut operation: F) -> Result<T>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool
  {
    let max_attempts = self.max_attempts.max(1);
    let mut attempt = 0;

    loop {
      attempt += 1;

      let error = match operation().await {
        Ok(value) => return Ok(value),
        Err(error) => error
      };

      if !is_retryable(&error) {
        return Err(error);
      }

      if attempt >= max_attempts {
        log::error!("Giving up after {attempt} attempts: {error}");
        return Err(Error::RetryExhausted { attempts: attempt, source: Box::new(error) });
      }

      let delay = self.backoff(attempt);
      log::warn!("Attempt {attempt}/{max_attempts} failed ({error}), retrying in {delay:?}");
      sleeper.sleep(delay).await;
    }
  }
}

/// Retry predicates for HTTP call sites.
pub mod retry_on {
  use crate::error::{is_transient, Error};

  /// Retries connection failures and every HTTP error status.
  pub fn transient_or_any_http(error: &Error) -> bool {
    is_transient(error) || matches!(error, Error::Http { .. })
  }

  /// Retries connection failures and HTTP errors except 401 and 402,
  /// which no amount of retrying fixes.
  pub fn transient_or_http_except_auth(error: &Error) -> bool {
    match error {
      Error::Http { status, .. } => !matches!(status, 401 | 402),
      other => is_transient(other)
    }
  }

  pub fn never(_: &Error) -> bool {
    false
  }
}
