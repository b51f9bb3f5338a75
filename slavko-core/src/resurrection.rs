/*!
Identity-gated retry executor with per-attempt timeouts and exponential backoff
*/

use std::future::Future;
use std::pin::pin;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::{AttemptFailure, ResurrectionError};
use crate::identity::{TokenSource, require_access_token};

/// Bounds for one retried call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; zero means exactly one attempt
    pub max_retries: u32,
    /// Window each attempt gets before it counts as failed
    pub timeout: Duration,
    /// Failed attempt n sleeps `backoff_base * 2^n` before the next one
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout: config.timeout(),
            backoff_base: config.backoff_base(),
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Per-call bookkeeping, dropped when the call returns
struct AttemptState<E> {
    attempt: u32,
    last_failure: Option<AttemptFailure<E>>,
    total_backoff: Duration,
}

impl<E> AttemptState<E> {
    fn new() -> Self {
        Self {
            attempt: 0,
            last_failure: None,
            total_backoff: Duration::ZERO,
        }
    }

    fn exhausted(self) -> ResurrectionError<E> {
        ResurrectionError::RetryExhausted {
            attempts: self.attempt,
            total_backoff: self.total_backoff,
            last: self
                .last_failure
                .unwrap_or(AttemptFailure::TimedOut(Duration::ZERO)),
        }
    }
}

/// Runs async operations on behalf of an authenticated caller, retrying on
/// failure or timeout until the budget runs out
pub struct Resurrection<S> {
    tokens: S,
    policy: RetryPolicy,
}

impl<S: TokenSource> Resurrection<S> {
    pub fn new(tokens: S) -> Self {
        Self::with_policy(tokens, RetryPolicy::default())
    }

    pub fn with_policy(tokens: S, policy: RetryPolicy) -> Self {
        Self { tokens, policy }
    }

    pub fn from_config(tokens: S, config: &RetryConfig) -> Self {
        Self::with_policy(tokens, RetryPolicy::from(config))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drive a single pending operation through up to `max_retries + 1`
    /// timeout windows.
    ///
    /// The operation is created once and never restarted: each retry keeps
    /// polling the same future under a fresh timeout, so a retry only widens
    /// the window the operation has to finish. Once the operation resolves to
    /// an error every later attempt observes that same error. Callers that
    /// need the work re-run per attempt should use [`Resurrection::run_with`].
    pub async fn run<F, T, E>(&self, operation: F) -> Result<T, ResurrectionError<E>>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        require_access_token(&self.tokens)?;

        let mut operation = pin!(operation);
        let mut settled = false;
        let mut state = AttemptState::new();

        while state.attempt < self.policy.total_attempts() {
            state.attempt += 1;

            if !settled {
                match timeout(self.policy.timeout, operation.as_mut()).await {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(e)) => {
                        settled = true;
                        state.last_failure = Some(AttemptFailure::Operation(e));
                    }
                    Err(_) => {
                        state.last_failure = Some(AttemptFailure::TimedOut(self.policy.timeout));
                    }
                }
            }

            if !self.after_failure(&mut state).await {
                break;
            }
        }

        Err(state.exhausted())
    }

    /// Like [`Resurrection::run`], but invokes `factory` for a fresh
    /// operation on every attempt
    pub async fn run_with<F, Fut, T, E>(&self, mut factory: F) -> Result<T, ResurrectionError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        require_access_token(&self.tokens)?;

        let mut state = AttemptState::new();

        while state.attempt < self.policy.total_attempts() {
            state.attempt += 1;

            match timeout(self.policy.timeout, factory()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => state.last_failure = Some(AttemptFailure::Operation(e)),
                Err(_) => {
                    state.last_failure = Some(AttemptFailure::TimedOut(self.policy.timeout));
                }
            }

            if !self.after_failure(&mut state).await {
                break;
            }
        }

        Err(state.exhausted())
    }

    /// Log the failed attempt and back off; false once the budget is spent
    async fn after_failure<E: std::fmt::Display>(&self, state: &mut AttemptState<E>) -> bool {
        let total = self.policy.total_attempts();
        if let Some(ref failure) = state.last_failure {
            warn!("⚠️ Attempt {}/{} failed: {}", state.attempt, total, failure);
        }

        if state.attempt >= total {
            return false;
        }

        let delay = self.policy.backoff_for(state.attempt);
        info!("⏳ Retrying in {:?}", delay);
        sleep(delay).await;
        state.total_backoff += delay;
        true
    }
}
