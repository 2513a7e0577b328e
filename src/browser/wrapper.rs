//! Browser process / connection ownership
//!
//! A `BrowserWrapper` holds the chromiumoxide `Browser` plus its event
//! handler task. Local launches own the process and (optionally) a throwaway
//! profile; remote connections only own the websocket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

use super::temp::{CleanupOutcome, remove_dir_with_retry};
use super::{BrowserError, BrowserResult, stealth};

/// Settings for one local launch
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub headless: bool,
    pub disable_security: bool,
    pub viewport: (u32, u32),
    pub user_data_dir: PathBuf,
    /// Delete `user_data_dir` on shutdown
    pub ephemeral_profile: bool,
}

/// Wrapper for Browser and its event handler task
///
/// The handler MUST be aborted once the browser is done or it runs forever;
/// `Drop` takes care of that.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    ephemeral_profile: bool,
    remote: bool,
}

impl BrowserWrapper {
    /// Launch a local browser process with the stealth flag set
    pub async fn launch_local(executable: &Path, options: LaunchOptions) -> BrowserResult<Self> {
        std::fs::create_dir_all(&options.user_data_dir)?;
        let (width, height) = options.viewport;

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .window_size(width, height)
            .viewport(Viewport {
                width,
                height,
                ..Viewport::default()
            })
            .user_data_dir(&options.user_data_dir)
            .chrome_executable(executable)
            .args(stealth::stealth_args());

        builder = if options.headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };

        if options.disable_security {
            warn!("Disabling browser security features (disable_security=true)");
            builder = builder.args(stealth::insecure_args());
        }

        if options.disable_security || should_disable_sandbox() {
            debug!("Disabling Chrome sandbox");
            builder = builder.arg("--no-sandbox").arg("--disable-setuid-sandbox");
        }

        let config = builder
            .build()
            .map_err(|e| BrowserError::LaunchFailed(format!("invalid browser config: {e}")))?;

        info!(
            executable = %executable.display(),
            headless = options.headless,
            profile = %options.user_data_dir.display(),
            "Launching browser"
        );
        let (browser, handler) = match Browser::launch(config).await {
            Ok(pair) => pair,
            Err(e) => {
                if options.ephemeral_profile {
                    let _ = std::fs::remove_dir_all(&options.user_data_dir);
                }
                return Err(BrowserError::LaunchFailed(e.to_string()));
            }
        };

        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            user_data_dir: Some(options.user_data_dir),
            ephemeral_profile: options.ephemeral_profile,
            remote: false,
        })
    }

    /// Attach to an already running browser over its websocket URL
    pub async fn connect(websocket_url: &str) -> BrowserResult<Self> {
        let (browser, handler) = Browser::connect(websocket_url)
            .await
            .map_err(|e| BrowserError::ConnectionFailed(format!("{websocket_url}: {e}")))?;
        info!(endpoint = %websocket_url, "Connected to remote browser");
        Ok(Self {
            browser,
            handler: spawn_handler(handler),
            user_data_dir: None,
            ephemeral_profile: false,
            remote: true,
        })
    }

    pub fn user_data_dir(&self) -> Option<&Path> {
        self.user_data_dir.as_deref()
    }

    /// Blank page, the right moment to register document-start scripts
    pub async fn new_blank_page(&self) -> BrowserResult<Page> {
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))
    }

    pub async fn pages(&self) -> BrowserResult<Vec<Page>> {
        self.browser
            .pages()
            .await
            .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))
    }

    /// Close the browser.
    ///
    /// Remote: disconnect only, the process keeps running. Local: terminate
    /// the process, wait for it, then remove a throwaway profile.
    pub async fn shutdown(mut self) -> CleanupOutcome {
        if self.remote {
            debug!("Disconnecting from remote browser");
            self.handler.abort();
            return CleanupOutcome::Removed;
        }

        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Browser close command failed");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Waiting for browser exit failed");
        }
        self.handler.abort();

        match self.user_data_dir.take() {
            Some(path) if self.ephemeral_profile => {
                info!(path = %path.display(), "Removing temporary profile");
                remove_dir_with_retry(&path, |p| std::fs::remove_dir_all(p)).await
            }
            _ => CleanupOutcome::Removed,
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(path) = self.user_data_dir.as_ref().filter(|_| self.ephemeral_profile) {
            warn!(
                path = %path.display(),
                "BrowserWrapper dropped without shutdown(); temporary profile orphaned"
            );
        }
    }
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // chromiumoxide lags behind the CDP protocol; unknown events
                // fail to deserialize without affecting the session
                if message.contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response")
                {
                    trace!("Suppressed benign CDP serialization error: {}", message);
                } else {
                    error!("Browser handler error: {:?}", e);
                }
            }
        }
        debug!("Browser handler task completed");
    })
}

/// Containers cannot use the setuid sandbox
fn should_disable_sandbox() -> bool {
    Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}
