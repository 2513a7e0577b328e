//! Throwaway visible browsers and profile directory cleanup
//!
//! Chrome can hold profile files open for a moment after exit. Removal is
//! retried once after a short pause; a second failure is reported, never
//! raised.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::Page;
use tracing::{info, warn};

use super::wrapper::{BrowserWrapper, LaunchOptions};
use super::{BrowserError, BrowserResult, ProvisionedBrowser, stealth};

pub const CLEANUP_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Removed,
    RemovedAfterRetry,
    /// Profile left on disk; the caller only gets a warning
    Leaked { path: PathBuf, error: String },
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        !matches!(self, CleanupOutcome::Leaked { .. })
    }
}

/// Whether an error looks like another process still holds the files
pub fn is_locked_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
        || matches!(err.raw_os_error(), Some(32) | Some(16) | Some(5))
}

/// Remove `path` with `remover`, retrying once after [`CLEANUP_RETRY_DELAY`]
/// when the first failure looks like a lock.
pub async fn remove_dir_with_retry<F>(path: &Path, mut remover: F) -> CleanupOutcome
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let first = match remover(path) {
        Ok(()) => return CleanupOutcome::Removed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return CleanupOutcome::Removed,
        Err(e) => e,
    };

    if !is_locked_error(&first) {
        warn!(path = %path.display(), error = %first, "Failed to remove browser profile");
        return CleanupOutcome::Leaked {
            path: path.to_path_buf(),
            error: first.to_string(),
        };
    }

    info!(path = %path.display(), "Profile still locked, retrying removal");
    tokio::time::sleep(CLEANUP_RETRY_DELAY).await;

    match remover(path) {
        Ok(()) => CleanupOutcome::RemovedAfterRetry,
        Err(e) if e.kind() == io::ErrorKind::NotFound => CleanupOutcome::RemovedAfterRetry,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Browser profile still locked after retry. Manual cleanup may be required."
            );
            CleanupOutcome::Leaked {
                path: path.to_path_buf(),
                error: e.to_string(),
            }
        }
    }
}

/// Profile directory name for one throwaway browser
pub fn temp_profile_dir() -> PathBuf {
    std::env::temp_dir().join(format!("kodegen_websearch_tmp_{}", uuid::Uuid::new_v4()))
}

/// Visible browser on its own throwaway profile
pub struct TempBrowser {
    wrapper: BrowserWrapper,
    page: Page,
}

/// Launch an isolated visible browser, optionally opening `url`
pub async fn launch_temp_browser(
    executable: &ProvisionedBrowser,
    viewport: (u32, u32),
    url: Option<&str>,
) -> BrowserResult<TempBrowser> {
    let options = LaunchOptions {
        headless: false,
        disable_security: false,
        viewport,
        user_data_dir: temp_profile_dir(),
        ephemeral_profile: true,
    };
    let wrapper = BrowserWrapper::launch_local(&executable.executable_path, options).await?;
    let page = wrapper.new_blank_page().await?;
    stealth::install(&page)
        .await
        .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
    if let Some(url) = url {
        page.goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
    }
    Ok(TempBrowser { wrapper, page })
}

impl TempBrowser {
    pub fn page(&self) -> &Page {
        &self.page
    }

    pub fn profile_dir(&self) -> Option<&Path> {
        self.wrapper.user_data_dir()
    }

    /// Terminate the process and delete its profile
    pub async fn close(self) -> CleanupOutcome {
        self.wrapper.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn locked() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "file in use")
    }

    #[tokio::test(start_paused = true)]
    async fn locked_profile_is_retried_once_after_pause() {
        let calls = Cell::new(0);
        let start = tokio::time::Instant::now();

        let outcome = remove_dir_with_retry(Path::new("/tmp/profile"), |_| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 { Err(locked()) } else { Ok(()) }
        })
        .await;

        assert_eq!(outcome, CleanupOutcome::RemovedAfterRetry);
        assert_eq!(calls.get(), 2);
        assert_eq!(start.elapsed(), CLEANUP_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn second_lock_failure_is_a_warning_not_an_error() {
        let calls = Cell::new(0);

        let outcome = remove_dir_with_retry(Path::new("/tmp/profile"), |_| {
            calls.set(calls.get() + 1);
            Err(locked())
        })
        .await;

        assert_eq!(calls.get(), 2);
        assert!(!outcome.is_clean());
        assert!(matches!(outcome, CleanupOutcome::Leaked { .. }));
    }

    #[tokio::test]
    async fn unrelated_errors_are_not_retried() {
        let calls = Cell::new(0);
        let outcome = remove_dir_with_retry(Path::new("/tmp/profile"), |_| {
            calls.set(calls.get() + 1);
            Err(io::Error::other("disk on fire"))
        })
        .await;
        assert_eq!(calls.get(), 1);
        assert!(!outcome.is_clean());
    }

    #[tokio::test]
    async fn removes_a_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let profile = dir.path().join("profile");
        std::fs::create_dir_all(profile.join("Default")).unwrap();
        std::fs::write(profile.join("Default/Cookies"), b"x").unwrap();

        let outcome = remove_dir_with_retry(&profile, |p| std::fs::remove_dir_all(p)).await;

        assert_eq!(outcome, CleanupOutcome::Removed);
        assert!(!profile.exists());
    }

    #[test]
    fn temp_profiles_are_unique() {
        assert_ne!(temp_profile_dir(), temp_profile_dir());
    }
}
