//! Bounded immediate retries for flaky reads.
//!
//! RPC endpoints used for read calls drop requests now and then. A small
//! number of immediate retries absorbs that; a persistent fault still surfaces
//! once the attempt budget is spent.

use std::{
    fmt::Display,
    future::Future,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use backon::{ConstantBuilder, Retryable};

use crate::error::RpcError;

/// Default number of attempts, including the first call.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Result of running an operation under [`retry_with_outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded after `attempts` calls.
    Success { value: T, attempts: usize },
    /// Every attempt failed; `error` is the one from the last call.
    Exhausted { error: E, attempts: usize },
}

impl<T, E> RetryOutcome<T, E> {
    /// Number of times the operation was invoked.
    pub fn attempts(&self) -> usize {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryOutcome::Exhausted { .. })
    }

    /// Collapse into a `Result`, surfacing the last error unchanged.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryOutcome::Success { value, .. } => Ok(value),
            RetryOutcome::Exhausted { error, .. } => Err(error),
        }
    }
}

/// Invoke `operation` up to `max_attempts` times, retrying immediately on failure.
///
/// Each failed attempt is logged with its attempt number. A `max_attempts` of
/// zero is treated as one.
pub async fn retry_with_outcome<T, E, F, Fut>(
    label: &str,
    max_attempts: usize,
    operation: F,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_outcome_if(label, max_attempts, operation, |_| true).await
}

/// Like [`retry_with_outcome`], but only errors for which `retryable` returns
/// `true` are retried. Any other error ends the loop at once.
pub async fn retry_with_outcome_if<T, E, F, Fut, R>(
    label: &str,
    max_attempts: usize,
    mut operation: F,
    retryable: R,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    R: FnMut(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let attempts = AtomicUsize::new(0);

    let backoff = ConstantBuilder::default()
        .with_delay(Duration::ZERO)
        .with_max_times(max_attempts - 1);

    let result = (|| {
        attempts.fetch_add(1, Ordering::Relaxed);
        operation()
    })
    .retry(backoff)
    .when(retryable)
    .notify(|error: &E, _| {
        tracing::warn!(
            label,
            attempt = attempts.load(Ordering::Relaxed),
            max_attempts,
            error = %error,
            "Call failed, retrying..."
        );
    })
    .await;

    let attempts = attempts.load(Ordering::Relaxed);
    match result {
        Ok(value) => RetryOutcome::Success { value, attempts },
        Err(error) => {
            if attempts < max_attempts {
                tracing::error!(label, attempts, error = %error, "Call failed, not retryable");
            } else {
                tracing::error!(
                    label,
                    attempts,
                    error = %error,
                    "Call failed {} times, giving up",
                    attempts
                );
            }
            RetryOutcome::Exhausted { error, attempts }
        }
    }
}

/// Like [`retry_with_outcome`], returning the value or the final error.
pub async fn with_retries<T, E, F, Fut>(
    label: &str,
    max_attempts: usize,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_outcome(label, max_attempts, operation)
        .await
        .into_result()
}

/// Retry a chain read, giving up at once on RPC errors that would only repeat.
///
/// Errors that do not come from a JSON-RPC endpoint are treated as transient.
pub async fn with_read_retries<T, F, Fut>(
    label: &str,
    max_attempts: usize,
    operation: F,
) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    retry_with_outcome_if(label, max_attempts, operation, |error: &anyhow::Error| {
        error
            .downcast_ref::<RpcError>()
            .is_none_or(RpcError::is_transient)
    })
    .await
    .into_result()
}
