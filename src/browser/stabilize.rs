//! Post-navigation stabilization wait
//!
//! Rendered HTML length is polled until it stops changing, a cheap proxy for
//! "the page finished rendering".

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::PageDriver;
use crate::utils::timeout::STABILIZATION_TIMEOUT;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Consecutive unchanged readings that count as stable
pub const STABLE_REPEATS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stabilization {
    pub polls: u32,
    pub stable: bool,
}

/// Wait until the page's HTML length repeats [`STABLE_REPEATS`] times in a
/// row, giving up after [`STABILIZATION_TIMEOUT`].
pub async fn wait_for_stable(page: &dyn PageDriver) -> Stabilization {
    wait_for_stable_within(page, STABILIZATION_TIMEOUT).await
}

pub async fn wait_for_stable_within(page: &dyn PageDriver, ceiling: Duration) -> Stabilization {
    let deadline = Instant::now() + ceiling;
    let mut last: Option<usize> = None;
    let mut repeats = 0;
    let mut polls = 0;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let length = match tokio::time::timeout(remaining, page.html_length()).await {
            Ok(Ok(length)) => Some(length),
            Ok(Err(e)) => {
                trace!(error = %e, "HTML length unavailable");
                None
            }
            Err(_) => None,
        };
        polls += 1;

        match (last, length) {
            (Some(previous), Some(current)) if previous == current => repeats += 1,
            _ => repeats = 0,
        }
        last = length;

        if repeats >= STABLE_REPEATS {
            debug!(polls, "Page stabilized");
            return Stabilization {
                polls,
                stable: true,
            };
        }

        if Instant::now() + POLL_INTERVAL > deadline {
            debug!(polls, "Stabilization ceiling reached");
            return Stabilization {
                polls,
                stable: false,
            };
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    #[tokio::test(start_paused = true)]
    async fn stable_page_exits_on_fourth_poll() {
        let page = FakePage::with_html("<html><body>done</body></html>");
        let start = Instant::now();

        let outcome = wait_for_stable(&page).await;

        assert!(outcome.stable);
        assert_eq!(outcome.polls, 4);
        assert_eq!(start.elapsed(), POLL_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn settles_after_growth_stops() {
        let page = FakePage::new();
        page.set_length_sequence(vec![100, 400, 900, 900]);

        let outcome = wait_for_stable(&page).await;

        assert!(outcome.stable);
        // 900 first seen on poll 3, then repeated on polls 4, 5 and 6
        assert_eq!(outcome.polls, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn ever_growing_page_is_capped() {
        let page = FakePage::new();
        page.set_length_sequence((1..=50).map(|n| n * 100).collect());
        let start = Instant::now();

        let outcome = wait_for_stable(&page).await;

        assert!(!outcome.stable);
        assert!(start.elapsed() <= STABILIZATION_TIMEOUT);
    }
}
