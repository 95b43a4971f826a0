use crate::prelude::*;
use chrono::prelude::*;
use retry_policies::policies::ExponentialBackoff;
use retry_policies::{RetryDecision, RetryPolicy};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff that gives up after `max_attempts` attempts in total.
pub(crate) fn bounded_backoff(max_attempts: u32) -> ExponentialBackoff {
    ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(500), Duration::from_secs(8))
        .build_with_max_retries(max_attempts.saturating_sub(1))
}

/// Retries the operation according to the given policy as long as the error
/// is classified as retryable. The last error is returned once the policy
/// gives up. Used for the operations that aren't covered by the retrying
/// HTTP middleware, e.g. Telegram uploads and external programs.
pub(crate) async fn retry_with_policy<T, E, Fut>(
    policy: &impl RetryPolicy,
    mut f: impl FnMut() -> Fut,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        let err = match f().await {
            Ok(output) => {
                if attempt > 0 {
                    warn!(%attempt, "Operation succeeded after a retry");
                }
                return Ok(output);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            if attempt > 0 {
                warn!(%attempt, "Operation failed with a non-retryable error after a retry");
            }
            return Err(err);
        }

        let execute_after = match policy.should_retry(attempt) {
            RetryDecision::Retry { execute_after } => execute_after,
            RetryDecision::DoNotRetry => {
                warn!(%attempt, %err, "Giving up retrying the operation");
                return Err(err);
            }
        };

        let duration = execute_after
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or_else(|err| {
                warn!(
                    err = tracing_err(&err),
                    %execute_after,
                    "Retry policy returned a negative duration, retrying immediately"
                );
                Duration::ZERO
            });

        warn!(
            %attempt,
            %err,
            duration = format_args!("{duration:.2?}"),
            "Sleeping before the next attempt",
        );

        tokio::time::sleep(duration).await;

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "retryable: {}", self.retryable)
        }
    }

    fn no_delay(max_attempts: u32) -> ExponentialBackoff {
        ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(1), Duration::from_millis(1))
            .build_with_max_retries(max_attempts - 1)
    }

    #[test_log::test(tokio::test)]
    async fn stops_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_policy(
            &no_delay(3),
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError { retryable: true }) }
            },
            |err| err.retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn non_retryable_error_propagates_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = retry_with_policy(
            &no_delay(3),
            || {
                calls.set(calls.get() + 1);
                async { Err(TestError { retryable: false }) }
            },
            |err| err.retryable,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn succeeds_after_a_retry() {
        let calls = Cell::new(0);
        let result = retry_with_policy(
            &no_delay(3),
            || {
                calls.set(calls.get() + 1);
                let attempt = calls.get();
                async move {
                    if attempt < 2 {
                        Err(TestError { retryable: true })
                    } else {
                        Ok(attempt)
                    }
                }
            },
            |err| err.retryable,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
    }
}
