//! Transient-failure retry for status and download calls

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::Result;

/// Upper bound for a single backoff delay
const BACKOFF_CAP: Duration = Duration::from_secs(8);

pub(crate) fn should_retry_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub(crate) fn is_retryable_error(error: &reqwest::Error) -> bool {
    if let Some(status) = error.status()
        && should_retry_status(status.as_u16())
    {
        return true;
    }

    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Exponential backoff with ±20% jitter, capped at eight seconds
pub(crate) fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponential = base.as_secs_f64() * 2f64.powi(i32::try_from(retry).unwrap_or(i32::MAX));
    let capped = exponential.min(BACKOFF_CAP.as_secs_f64());
    let jitter: f64 = rand::rng().random_range(0.8..=1.2);

    Duration::from_secs_f64((capped * jitter).min(BACKOFF_CAP.as_secs_f64()))
}

/// Run `operation`, repeating it up to `retries` extra times while it fails transiently
///
/// Non-transient errors are returned immediately. The last transient error is
/// returned once retries are exhausted.
pub(crate) async fn with_transient_retries<T, F, Fut>(
    provider: &str,
    retries: u32,
    base: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && retry < retries => {
                let delay = backoff_delay(base, retry);
                retry += 1;

                tracing::warn!(
                    provider = %provider,
                    retry,
                    max_retries = retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "retrying after transient error: {error}"
                );

                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
