//! Guard for calls that leave the process (completion, embedding, extraction).
//!
//! `guarded` bounds a call with a timeout and turns the expiry into
//! `Error::Timeout`. `or_fallback` resolves a failed call to the value the
//! call site declares, logging and counting the degradation.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::metrics;
use crate::{Error, Result};

/// Run `call` with a deadline.
pub async fn guarded<T, F>(label: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(label.to_string())),
    }
}

/// Unwrap `result` or substitute `fallback()`.
pub fn or_fallback<T>(label: &str, result: Result<T>, fallback: impl FnOnce() -> T) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(service = label, "external call failed, using fallback: {}", err);
            metrics::record_external_failure(label);
            fallback()
        }
    }
}

/// `guarded` followed by `or_fallback`.
pub async fn call_or<T, F>(
    label: &str,
    limit: Duration,
    call: F,
    fallback: impl FnOnce() -> T,
) -> T
where
    F: Future<Output = Result<T>>,
{
    or_fallback(label, guarded(label, limit, call).await, fallback)
}
