//! Anti-detection launch flags and the script injected into every new
//! document of a visible browser.

use anyhow::{Context, Result};
use chromiumoxide::Page;
use tracing::debug;

use crate::utils::constants::CHROME_USER_AGENT;

/// Hides the common automation fingerprints before any page script runs
pub const ANTI_DETECTION_SCRIPT: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    try { delete navigator.__proto__.webdriver; } catch (_) {}

    if (!window.chrome) {
        window.chrome = {};
    }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {};
    }

    Object.defineProperty(navigator, 'plugins', {
        get: () => [1, 2, 3, 4, 5],
        configurable: true
    });
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });

    const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
    if (originalQuery) {
        window.navigator.permissions.query = (parameters) =>
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters);
    }

    delete window.callPhantom;
    delete window._phantom;
    delete window.__nightmare;
    delete window.domAutomation;
    delete window.domAutomationController;
})();
"#;

/// Flags added to every local launch regardless of security settings
pub fn stealth_args() -> Vec<String> {
    let mut args = vec![format!("--user-agent={CHROME_USER_AGENT}")];
    args.extend(
        [
            "--disable-blink-features=AutomationControlled",
            "--disable-infobars",
            "--disable-notifications",
            "--no-first-run",
            "--no-default-browser-check",
            "--disable-popup-blocking",
            "--disable-background-timer-throttling",
            "--disable-backgrounding-occluded-windows",
            "--disable-breakpad",
            "--disable-features=TranslateUI",
            "--disable-hang-monitor",
            "--disable-prompt-on-repost",
            "--password-store=basic",
            "--use-mock-keychain",
            "--mute-audio",
        ]
        .into_iter()
        .map(String::from),
    );
    args
}

/// Flags that weaken the browser's origin isolation; opt-in only
pub fn insecure_args() -> Vec<String> {
    [
        "--disable-web-security",
        "--disable-features=IsolateOrigins,site-per-process",
        "--ignore-certificate-errors",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Register the anti-detection script so it runs before each document load
pub async fn install(page: &Page) -> Result<()> {
    page.evaluate_on_new_document(ANTI_DETECTION_SCRIPT)
        .await
        .context("Failed to inject anti-detection script")?;
    debug!("Anti-detection script registered");
    Ok(())
}
