//! Shared constants for sessions, search results and remote discovery

/// Chrome user agent string for stealth mode
///
/// Updated: 2025-01-29 to Chrome 132 (current stable)
/// Next update: 2025-04-29 (quarterly schedule)
///
/// Reference: https://chromiumdash.appspot.com/schedule
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// User agent sent while emulating a phone
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";

/// Viewport used when the `browser_viewport` preference is missing or malformed
pub const DEFAULT_VIEWPORT: (u32, u32) = (1280, 800);

/// Placeholder the result pages fall back to when a link has no parsable host
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// Localhost ports tried during remote browser auto-discovery
pub const REMOTE_DEBUG_PORTS: std::ops::RangeInclusive<u16> = 9222..=9229;

/// User agent sent while emulating a tablet
pub const TABLET_USER_AGENT: &str = "Mozilla/5.0 (iPad; CPU OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
