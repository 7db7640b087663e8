//! Backoff helper for the "retry on storage contention" policy described
//! throughout spec.md §4.1 / §5: default 5 attempts, 100ms initial delay,
//! doubling.
//!
//! This is deliberately a four-line loop rather than a dependency on a
//! dedicated backoff crate — the teacher's own `StateActor::Sync` handles
//! retry with a similarly small hand-rolled loop.

use std::time::Duration;
use tracing::trace;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
        }
    }
}

/// A write failed in a way the caller considers retryable (lock busy,
/// contention, etc).
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Run `op` until it succeeds, returns a non-retryable error, or the
/// attempt budget is exhausted (in which case the last error is returned).
pub async fn with_backoff<T, E, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_attempts && e.is_retryable() => {
                trace!(attempt, ?delay, "retrying after recoverable error");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Busy;
    impl Retryable for Busy {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    #[derive(Debug)]
    struct Fatal;
    impl Retryable for Fatal {
        fn is_retryable(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
        };
        let result: Result<u32, Busy> = with_backoff(policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Busy)
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy::default();
        let result: Result<u32, Fatal> = with_backoff(policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Fatal)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
        };
        let result: Result<u32, Busy> = with_backoff(policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Busy)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
