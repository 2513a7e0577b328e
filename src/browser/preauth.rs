//! Persistent "pre-authenticated" profile
//!
//! The user logs in once through a visible window on this profile; later
//! sessions reuse it so login-gated platforms serve content directly.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::wrapper::{BrowserWrapper, LaunchOptions};
use super::{BrowserError, BrowserResult, ProvisionedBrowser, stealth};

/// `<data dir>/kodegen/websearch/preauth-profile`
pub fn profile_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kodegen")
        .join("websearch")
        .join("preauth-profile")
}

/// Chrome leaves a `SingletonLock` in a profile another process is using
pub fn profile_in_use(dir: &Path) -> bool {
    dir.join("SingletonLock").symlink_metadata().is_ok()
}

/// Launch options that point a session at the persistent profile
pub fn launch_options(headless: bool, disable_security: bool, viewport: (u32, u32)) -> LaunchOptions {
    LaunchOptions {
        headless,
        disable_security,
        viewport,
        user_data_dir: profile_dir(),
        ephemeral_profile: false,
    }
}

/// Open a visible window on the persistent profile at `login_url`.
///
/// The caller keeps the wrapper alive while the user logs in, then shuts it
/// down; cookies stay in the profile.
pub async fn open_login_window(
    executable: &ProvisionedBrowser,
    viewport: (u32, u32),
    login_url: &str,
) -> BrowserResult<BrowserWrapper> {
    let dir = profile_dir();
    if profile_in_use(&dir) {
        warn!(profile = %dir.display(), "Pre-auth profile appears to be in use by another browser");
    }

    let wrapper =
        BrowserWrapper::launch_local(&executable.executable_path, launch_options(false, false, viewport))
            .await?;
    let page = wrapper.new_blank_page().await?;
    stealth::install(&page)
        .await
        .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
    page.goto(login_url)
        .await
        .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;

    info!(url = %login_url, profile = %dir.display(), "Login window open");
    Ok(wrapper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_profile_is_never_ephemeral() {
        let options = launch_options(true, false, (800, 600));
        assert!(!options.ephemeral_profile);
        assert!(options.user_data_dir.ends_with("preauth-profile"));
    }

    #[test]
    fn detects_singleton_lock() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!profile_in_use(dir.path()));
        std::fs::write(dir.path().join("SingletonLock"), b"host-1234").unwrap();
        assert!(profile_in_use(dir.path()));
    }
}
