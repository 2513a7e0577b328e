//! Browser infrastructure for launching, connecting to and driving Chrome
//!
//! `BrowserSession` owns one process or remote connection plus its active
//! page. Scrapers only see the `PageDriver` / `ScrapeSession` seams so they
//! can be exercised against fakes.

mod driver;
pub mod preauth;
pub mod remote;
pub mod screenshot;
mod session;
pub mod stabilize;
pub mod stealth;
pub mod temp;
mod wrapper;

pub use crate::browser_setup::{
    BrowserProvisioner, InstallSource, ProvisionError, ProvisionedBrowser, find_browser_executable,
};
pub use driver::{ImageFormat, PageDriver, ScrapeSession, SessionFactory};
pub use session::{
    ActionOutcome, BrowserSession, DevicePreset, MousePosition, PointerTarget, ScrollTarget,
    SessionMode, SessionState,
};
pub use wrapper::BrowserWrapper;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("Failed to connect to remote browser: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create page: {0}")]
    PageCreationFailed(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("No page loaded. Navigate to a URL first.")]
    NoPage,

    #[error("Page action failed: {0}")]
    ActionFailed(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("Browser provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for BrowserError {
    fn from(err: std::io::Error) -> Self {
        BrowserError::IoError(err.to_string())
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// Root domain of a URL: host without a leading `www.`, no path or query.
///
/// Used to decide whether an already-open page can be reused for a
/// navigation.
pub fn root_domain(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}
