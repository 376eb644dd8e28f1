//! Hand-rolled exponential backoff for activity retries (initial 1s, cap
//! 60s, coefficient 2.0). Plain interval math inline rather than a
//! `backoff` crate dependency for three lines of arithmetic.

use std::time::Duration;

use fleetlift_core::FleetliftError;
use tracing::warn;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const COEFFICIENT: f64 = 2.0;

fn next_backoff(current: Duration) -> Duration {
    let scaled = current.mul_f64(COEFFICIENT);
    std::cmp::min(scaled, MAX_BACKOFF)
}

/// Runs `f` up to `max_attempts` times, retrying only on
/// [`FleetliftError::is_retriable`] errors with exponential backoff between
/// attempts. A non-retriable error or the final attempt's error is returned
/// immediately.
pub async fn with_retry<T, F, Fut>(
    activity: &str,
    max_attempts: u32,
    mut f: F,
) -> Result<T, FleetliftError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, FleetliftError>>,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts || !e.is_retriable() => return Err(e),
            Err(e) => {
                warn!(activity, attempt, error = %e, "activity failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_until_the_cap() {
        let mut b = INITIAL_BACKOFF;
        for _ in 0..10 {
            b = next_backoff(b);
        }
        assert_eq!(b, MAX_BACKOFF);
    }

    #[tokio::test]
    async fn retries_retriable_errors_until_success() {
        let attempts = AtomicU32::new(0);
        let result = with_retry("test", 3, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(FleetliftError::Infrastructure("transient".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn never_retries_non_retriable_errors() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", 3, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(FleetliftError::Validation("bad input".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
