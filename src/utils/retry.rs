//! Bounded retry policies for flaky DOM operations
//!
//! Every "poll until the page is ready" loop in the crate goes through
//! [`retry_until`] with one of the named policies below, so no loop can spin
//! forever.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, trace};

/// `max_attempts` tries, sleeping `interval` between consecutive tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Upper bound on time spent sleeping between attempts
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Typing the query and submitting the engine's search form
pub const SUBMIT_POLICY: RetryPolicy = RetryPolicy::new(50, Duration::from_millis(100));

/// Clicking the engine's next-page control
pub const NEXT_PAGE_POLICY: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(1));

/// Extracting results from an engine results page
pub const EXTRACT_POLICY: RetryPolicy = RetryPolicy::new(30, Duration::from_secs(1));

/// Waiting for platform content, generous enough for an interactive login
pub const CONTENT_POLL_POLICY: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(5));

/// Scroll rounds on infinite-scroll platforms
pub const SCROLL_POLICY: RetryPolicy = RetryPolicy::new(40, Duration::from_millis(1500));

/// Waiting for an expanded item (full text, comment panel) to render
pub const EXPAND_POLICY: RetryPolicy = RetryPolicy::new(10, Duration::from_millis(500));

/// Outcome of one attempt
#[derive(Debug)]
pub enum Attempt<T> {
    /// Succeeded, stop retrying
    Ready(T),
    /// Not yet, sleep the policy interval
    NotYet,
    /// Not yet, sleep this longer interval instead
    Backoff(Duration),
}

/// Run `op` until it returns [`Attempt::Ready`] or the policy is exhausted.
///
/// Errors count as failed attempts. `op` receives the 1-based attempt number.
/// Returns `None` on exhaustion.
pub async fn retry_until<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Attempt<T>>>,
{
    for attempt in 1..=policy.max_attempts {
        let pause = match op(attempt).await {
            Ok(Attempt::Ready(value)) => {
                trace!(label, attempt, "Retry loop succeeded");
                return Some(value);
            }
            Ok(Attempt::NotYet) => policy.interval,
            Ok(Attempt::Backoff(longer)) => longer,
            Err(e) => {
                debug!(label, attempt, error = %e, "Attempt failed");
                policy.interval
            }
        };

        if attempt < policy.max_attempts {
            tokio::time::sleep(pause).await;
        }
    }

    debug!(
        label,
        attempts = policy.max_attempts,
        "Retry policy exhausted"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_until(SUBMIT_POLICY, "submit", |attempt| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(if attempt == 3 {
                    Attempt::Ready("done")
                } else {
                    Attempt::NotYet
                })
            }
        })
        .await;

        assert_eq!(result, Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts_and_errors_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        let result: Option<()> = retry_until(policy, "extract", |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("node detached"))
            }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // four sleeps between five attempts, none after the last
        assert_eq!(start.elapsed(), policy.max_wait());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_uses_the_longer_pause() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let result: Option<()> = retry_until(policy, "validate", |_| async {
            Ok(Attempt::Backoff(Duration::from_secs(2)))
        })
        .await;

        assert!(result.is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn named_policies_match_documented_budgets() {
        assert_eq!(SUBMIT_POLICY.max_attempts, 50);
        assert_eq!(SUBMIT_POLICY.interval, Duration::from_millis(100));
        assert_eq!(NEXT_PAGE_POLICY.max_attempts, 30);
        assert_eq!(EXTRACT_POLICY.interval, Duration::from_secs(1));
        // roughly five minutes for login-gated content
        assert_eq!(CONTENT_POLL_POLICY.max_attempts, 60);
        assert_eq!(CONTENT_POLL_POLICY.interval, Duration::from_secs(5));
    }
}
