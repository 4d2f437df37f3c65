//! Retry policy - bounded, cancellable retry-with-delay
//!
//! Built for transient readiness checks ("is the deployed endpoint
//! answering yet") where failure is expected during a warm-up window, not a
//! logic error. Stage-level failures are never retried; only individual
//! steps opt in.

use crate::core::step::RetrySpec;
use crate::execution::runner::{Outcome, RunnerError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};
use tracing::debug;

/// Cooperative cancellation flag shared between the engine, in-flight step
/// executions, and retry waits.
#[derive(Clone, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake all waiters
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until cancellation is signalled
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// Bounded retry-with-delay around a step execution
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: usize,

    /// Non-busy wait between failed attempts
    pub delay_between: Duration,

    /// Per-attempt timeout; unlimited here when the operation bounds itself
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_spec(spec: &RetrySpec) -> Self {
        Self {
            max_attempts: spec.max_attempts,
            delay_between: spec.delay_between,
            attempt_timeout: spec.attempt_timeout,
        }
    }

    /// Apply `op` up to `max_attempts` times. Returns the first success or
    /// the last failure after exhausting attempts. The delay between
    /// attempts is a non-busy wait and aborts immediately on cancellation.
    pub async fn run<F, Fut>(
        &self,
        mut op: F,
        cancel: &CancelFlag,
    ) -> Result<Outcome, RunnerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Outcome, RunnerError>>,
    {
        let max_attempts = self.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }

            let result = match self.attempt_timeout {
                Some(limit) => match timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(RunnerError::Timeout(limit.as_secs())),
                },
                None => op().await,
            };

            match result {
                Ok(outcome) if outcome.success => {
                    debug!("attempt {}/{} succeeded", attempt, max_attempts);
                    return Ok(outcome);
                }
                other => {
                    if attempt == max_attempts {
                        return other;
                    }
                    debug!(
                        "attempt {}/{} failed, retrying in {:?}",
                        attempt, max_attempts, self.delay_between
                    );
                    tokio::select! {
                        _ = sleep(self.delay_between) => {}
                        _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
                    }
                }
            }
        }

        // max_attempts >= 1, so the loop always returns
        Err(RunnerError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    fn counting_op(
        counter: Arc<AtomicUsize>,
        succeed_on: usize,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = Result<Outcome, RunnerError>> + Send>>
    {
        move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Outcome {
                    success: attempt >= succeed_on,
                    ..Outcome::default()
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_twice_then_succeed() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_between: Duration::from_secs(10),
            attempt_timeout: None,
        };
        let counter = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let outcome = policy
            .run(counting_op(Arc::clone(&counter), 3), &CancelFlag::new())
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // Two delays between three attempts on the paused clock
        assert_eq!(started.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_failure() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_between: Duration::from_secs(1),
            attempt_timeout: None,
        };
        let counter = Arc::new(AtomicUsize::new(0));

        let outcome = policy
            .run(counting_op(Arc::clone(&counter), 99), &CancelFlag::new())
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            delay_between: Duration::from_secs(3600),
            attempt_timeout: None,
        };
        let cancel = CancelFlag::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let result = policy.run(counting_op(counter, 99), &cancel).await;

        assert!(matches!(result, Err(RunnerError::Cancelled)));
        // Aborted mid-delay, long before the hour was up
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let policy = RetryPolicy {
            max_attempts: 2,
            delay_between: Duration::from_secs(1),
            attempt_timeout: Some(Duration::from_secs(5)),
        };

        let result = policy
            .run(
                || async {
                    sleep(Duration::from_secs(60)).await;
                    Ok(Outcome {
                        success: true,
                        ..Outcome::default()
                    })
                },
                &CancelFlag::new(),
            )
            .await;

        assert!(matches!(result, Err(RunnerError::Timeout(5))));
    }
}
