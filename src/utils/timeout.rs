//! Per-operation timeouts
//!
//! There is no global deadline for a search call; each browser or network
//! operation carries its own ceiling.

use std::future::Future;
use std::time::Duration;

/// Page navigation (`goto`) ceiling
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(7);

/// Ceiling of the post-navigation stabilization wait
pub const STABILIZATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Reachability check of the primary browser distribution source
pub const PROVISION_REACH_TIMEOUT: Duration = Duration::from_secs(3);

/// Whole-archive download from a mirror
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// `/json/version` request against a remote debugging endpoint
pub const REMOTE_VERSION_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait for navigation or network idle after a mouse action fired requests
pub const POST_CLICK_SETTLE_TIMEOUT: Duration = Duration::from_secs(7);

/// Run `fut` with a ceiling, mapping expiry to `None`.
pub async fn run_with_timeout<F, T>(limit: Duration, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.ok()
}
