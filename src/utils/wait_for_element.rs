//! Element polling utility for SPA support
//!
//! Provides wait_for_selector() which polls for DOM elements with exponential backoff.
//! Single Page Applications render elements via JavaScript after the initial
//! load event fires, so presence has to be polled.

use std::time::Duration;

use crate::browser::PageDriver;

/// Wait for a selector to match in the DOM using exponential backoff polling
///
/// # Polling Strategy
/// - Starts at 100ms intervals
/// - Doubles each retry (exponential backoff)
/// - Caps at 1 second maximum interval
/// - Total duration limited by timeout parameter
pub async fn wait_for_selector(
    page: &dyn PageDriver,
    selector: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let start = tokio::time::Instant::now();
    let mut poll_interval = Duration::from_millis(100);
    let max_interval = Duration::from_secs(1);

    loop {
        if page.exists(selector).await.unwrap_or(false) {
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(anyhow::anyhow!(
                "Element not found (timeout after {}ms): '{}'",
                timeout.as_millis(),
                selector
            ));
        }

        tokio::time::sleep(poll_interval).await;
        poll_interval = (poll_interval * 2).min(max_interval);
    }
}
