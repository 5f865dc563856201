//! Bounded retry with exponential backoff.

use std::future::Future;

use intake_shared::{IntakeError, Result, RetryPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs an operation until it succeeds or the policy's attempts run out.
///
/// Every failure counts toward the budget; the executor does not tell
/// transient failures from permanent ones. Callers keep permanent failures
/// (schema violations, bad input) outside the retried operation.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: None,
        }
    }

    /// Stop before the next attempt (or mid-backoff) once `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run `operation` up to `max_attempts` times.
    ///
    /// After failed attempt `i` the caller is suspended for
    /// `initial_delay_ms * backoff_multiplier^(i-1)`. When every attempt
    /// fails the last failure comes back wrapped in
    /// [`IntakeError::RetryExhausted`].
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.check_cancelled()?;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempts = max_attempts, error = %err, "retry budget exhausted");
                    return Err(IntakeError::RetryExhausted {
                        attempts: max_attempts,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    self.backoff(delay).await?;
                    attempt += 1;
                }
            }
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if let Some(token) = &self.cancel
            && token.is_cancelled()
        {
            return Err(IntakeError::Cancelled);
        }
        Ok(())
    }

    async fn backoff(&self, delay: std::time::Duration) -> Result<()> {
        match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => Err(IntakeError::Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    fn policy(max_attempts: u32, initial_delay_ms: u64, backoff_multiplier: f64) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms,
            backoff_multiplier,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_runs_exactly_n_times_with_backoff() {
        let executor = RetryExecutor::new(policy(4, 100, 2.0));
        let started: Mutex<Vec<Instant>> = Mutex::new(Vec::new());

        let result: Result<()> = executor
            .execute(|| {
                started.lock().unwrap().push(Instant::now());
                async { Err(IntakeError::Invocation("connection refused".into())) }
            })
            .await;

        match result {
            Err(IntakeError::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, IntakeError::Invocation(_)));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }

        let started = started.into_inner().unwrap();
        assert_eq!(started.len(), 4);
        let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_retrying() {
        let executor = RetryExecutor::new(policy(5, 10, 1.5));
        let calls = AtomicU32::new(0);

        let value = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(IntakeError::InvocationTimeout { timeout_ms: 10 })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_success_is_never_repeated() {
        let executor = RetryExecutor::new(policy(3, 1_000, 2.0));
        let calls = AtomicU32::new(0);
        let before = Instant::now();

        executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, IntakeError>("done") }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_wraps_first_failure() {
        let executor = RetryExecutor::new(policy(1, 1_000, 2.0));
        let err = executor
            .execute(|| async { Err::<(), _>(IntakeError::Invocation("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::RetryExhausted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_further_attempts() {
        let token = CancellationToken::new();
        let executor = RetryExecutor::new(policy(5, 1_000, 2.0)).with_cancellation(token.clone());
        let calls = AtomicU32::new(0);

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                token.cancel();
            })
        };

        let err = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(IntakeError::Invocation("down".into())) }
            })
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, IntakeError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_prevents_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let executor = RetryExecutor::new(policy(3, 0, 1.0)).with_cancellation(token);
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, IntakeError>(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, IntakeError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
