//! Browser provisioning
//!
//! `BrowserProvisioner::ensure_browser` guarantees a usable Chrome/Chromium
//! executable: `CHROMIUM_PATH` and system installs first, then previous
//! downloads under the cache directory, then the chromiumoxide fetcher when
//! its distribution host is reachable, then archive mirrors. Concurrent
//! callers serialize behind one async mutex so nothing downloads twice.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ProvisionerConfig;
use crate::utils::timeout::{DOWNLOAD_TIMEOUT, PROVISION_REACH_TIMEOUT};

/// Host the chromiumoxide fetcher downloads from
pub const PRIMARY_SOURCE_URL: &str = "https://storage.googleapis.com/chromium-browser-snapshots/";

/// Chrome for Testing builds tried against the mirrors, newest first
pub const MIRROR_VERSIONS: &[&str] = &["131.0.6778.204", "130.0.6723.116"];

/// `{version}` and `{platform}` are substituted per attempt
pub const MIRROR_TEMPLATES: &[(&str, &str)] = &[
    (
        "chrome-for-testing",
        "https://storage.googleapis.com/chrome-for-testing-public/{version}/{platform}/chrome-{platform}.zip",
    ),
    (
        "npmmirror",
        "https://cdn.npmmirror.com/binaries/chrome-for-testing/{version}/{platform}/chrome-{platform}.zip",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionAttempt {
    pub source: String,
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Another provisioning run did not finish within {0:?}")]
    Busy(Duration),

    #[error("No usable browser. Tried: {}", format_attempts(.attempts))]
    Exhausted { attempts: Vec<ProvisionAttempt> },
}

fn format_attempts(attempts: &[ProvisionAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.source, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    /// `CHROMIUM_PATH`
    Environment,
    System,
    /// A previous download found under the cache directory
    Cached,
    Fetcher,
    Mirror(String),
}

impl fmt::Display for InstallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallSource::Environment => write!(f, "CHROMIUM_PATH"),
            InstallSource::System => write!(f, "system install"),
            InstallSource::Cached => write!(f, "cached download"),
            InstallSource::Fetcher => write!(f, "managed download"),
            InstallSource::Mirror(name) => write!(f, "mirror {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedBrowser {
    pub executable_path: PathBuf,
    pub source: InstallSource,
}

#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    pub cache_dir: PathBuf,
    pub max_wait: Duration,
    pub reach_timeout: Duration,
    pub download_timeout: Duration,
    /// Consult `CHROMIUM_PATH` and system installs
    pub use_system: bool,
}

impl ProvisionerSettings {
    pub fn from_config(config: &ProvisionerConfig) -> Self {
        Self {
            cache_dir: config
                .cache_dir
                .clone()
                .unwrap_or_else(default_cache_dir),
            max_wait: Duration::from_secs(config.max_wait_secs),
            reach_timeout: Duration::from_secs(config.reach_timeout_secs),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            use_system: true,
        }
    }

    fn fetcher_dir(&self) -> PathBuf {
        self.cache_dir.join("chromium")
    }

    fn mirror_dir(&self) -> PathBuf {
        self.cache_dir.join("browsers")
    }
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_wait: Duration::from_secs(60),
            reach_timeout: PROVISION_REACH_TIMEOUT,
            download_timeout: DOWNLOAD_TIMEOUT,
            use_system: true,
        }
    }
}

pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| {
            let fallback = std::env::temp_dir().join(".cache");
            warn!(
                "Could not determine system cache directory, using {}",
                fallback.display()
            );
            fallback
        })
        .join("kodegen")
        .join("websearch")
}

/// Shared, lockable provisioning state
pub struct BrowserProvisioner {
    settings: ProvisionerSettings,
    cached: Mutex<Option<ProvisionedBrowser>>,
    client: reqwest::Client,
}

impl BrowserProvisioner {
    pub fn new(settings: ProvisionerSettings) -> Self {
        Self {
            settings,
            cached: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    pub fn settings(&self) -> &ProvisionerSettings {
        &self.settings
    }

    /// Resolve a usable executable, provisioning one if needed.
    ///
    /// Idempotent; later callers get the cached result.
    pub async fn ensure_browser(&self) -> Result<ProvisionedBrowser, ProvisionError> {
        let mut guard = tokio::time::timeout(self.settings.max_wait, self.cached.lock())
            .await
            .map_err(|_| ProvisionError::Busy(self.settings.max_wait))?;

        if let Some(found) = guard.as_ref()
            && found.executable_path.exists()
        {
            return Ok(found.clone());
        }

        let found = self.provision().await?;
        info!(
            path = %found.executable_path.display(),
            source = %found.source,
            "Browser ready"
        );
        *guard = Some(found.clone());
        Ok(found)
    }

    async fn provision(&self) -> Result<ProvisionedBrowser, ProvisionError> {
        let mut attempts = Vec::new();

        if self.settings.use_system {
            if let Some((path, source)) = find_browser_executable() {
                return Ok(ProvisionedBrowser {
                    executable_path: path,
                    source,
                });
            }
        }

        if let Some(path) = scan_install_dirs(&self.settings.cache_dir) {
            return Ok(ProvisionedBrowser {
                executable_path: path,
                source: InstallSource::Cached,
            });
        }

        let primary_reachable = self.check_primary().await;
        if primary_reachable {
            match self.run_fetcher().await {
                Ok(path) => {
                    return Ok(ProvisionedBrowser {
                        executable_path: path,
                        source: InstallSource::Fetcher,
                    });
                }
                Err(e) => attempts.push(ProvisionAttempt {
                    source: "fetcher".to_string(),
                    error: format!("{e:#}"),
                }),
            }
        } else {
            attempts.push(ProvisionAttempt {
                source: "fetcher".to_string(),
                error: format!("{PRIMARY_SOURCE_URL} unreachable"),
            });
        }

        if let Some(platform) = chrome_for_testing_platform() {
            for (name, template, version) in mirror_candidates() {
                let url = template
                    .replace("{version}", version)
                    .replace("{platform}", platform);
                match self.install_from_mirror(&url, version).await {
                    Ok(path) => {
                        return Ok(ProvisionedBrowser {
                            executable_path: path,
                            source: InstallSource::Mirror(name.to_string()),
                        });
                    }
                    Err(e) => {
                        warn!(mirror = name, version, error = %e, "Mirror install failed");
                        attempts.push(ProvisionAttempt {
                            source: format!("{name} {version}"),
                            error: format!("{e:#}"),
                        });
                    }
                }
            }
        }

        if !primary_reachable {
            info!("All mirrors failed, forcing managed download");
            match self.run_fetcher().await {
                Ok(path) => {
                    return Ok(ProvisionedBrowser {
                        executable_path: path,
                        source: InstallSource::Fetcher,
                    });
                }
                Err(e) => attempts.push(ProvisionAttempt {
                    source: "fetcher (forced)".to_string(),
                    error: format!("{e:#}"),
                }),
            }
        }

        Err(ProvisionError::Exhausted { attempts })
    }

    async fn check_primary(&self) -> bool {
        match self
            .client
            .head(PRIMARY_SOURCE_URL)
            .timeout(self.settings.reach_timeout)
            .send()
            .await
        {
            Ok(response) => {
                debug!(status = %response.status(), "Primary browser source reachable");
                true
            }
            Err(e) => {
                debug!(error = %e, "Primary browser source unreachable");
                false
            }
        }
    }

    async fn run_fetcher(&self) -> Result<PathBuf> {
        let dir = self.settings.fetcher_dir();
        std::fs::create_dir_all(&dir).context("Failed to create cache directory")?;
        info!(path = %dir.display(), "Downloading managed Chromium");

        let fetcher = BrowserFetcher::new(
            BrowserFetcherOptions::builder()
                .with_path(&dir)
                .build()
                .context("Failed to build fetcher options")?,
        );
        let revision = tokio::time::timeout(self.settings.download_timeout, fetcher.fetch())
            .await
            .map_err(|_| anyhow!("download exceeded {:?}", self.settings.download_timeout))?
            .context("Failed to fetch browser")?;
        Ok(revision.executable_path)
    }

    async fn install_from_mirror(&self, url: &str, version: &str) -> Result<PathBuf> {
        let install_dir = self.settings.mirror_dir().join(version);
        std::fs::create_dir_all(&install_dir)
            .with_context(|| format!("Failed to create {}", install_dir.display()))?;

        let result = self.download_and_extract(url, &install_dir).await;
        if result.is_err() {
            // partial downloads must not be mistaken for an install later
            if let Err(e) = std::fs::remove_dir_all(&install_dir) {
                debug!(path = %install_dir.display(), error = %e, "Partial install cleanup failed");
            }
        }
        result
    }

    async fn download_and_extract(&self, url: &str, install_dir: &Path) -> Result<PathBuf> {
        info!(url, "Downloading browser archive");
        let response = self
            .client
            .get(url)
            .timeout(self.settings.download_timeout)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()?;
        let bytes = response.bytes().await.context("Archive download interrupted")?;

        let archive = install_dir.join("browser.zip");
        tokio::fs::write(&archive, &bytes)
            .await
            .context("Failed to write archive")?;

        extract_archive(&archive, install_dir).await?;
        let _ = std::fs::remove_file(&archive);

        find_executable_in(install_dir)
            .ok_or_else(|| anyhow!("archive from {url} contained no browser executable"))
    }
}

/// Unzip with the `zip` crate, falling back to the OS archiver
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let (archive_owned, dest_owned) = (archive.to_path_buf(), dest.to_path_buf());
    let native = tokio::task::spawn_blocking(move || -> Result<()> {
        let file = std::fs::File::open(&archive_owned)?;
        let mut zip = zip::ZipArchive::new(file).context("Not a zip archive")?;
        zip.extract(&dest_owned).context("Zip extraction failed")?;
        Ok(())
    })
    .await
    .context("Extraction task panicked")?;

    match native {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "Built-in unzip failed, trying OS archiver");
            extract_with_os_command(archive, dest)
        }
    }
}

fn extract_with_os_command(archive: &Path, dest: &Path) -> Result<()> {
    let status = if cfg!(target_os = "windows") {
        Command::new("powershell")
            .args(["-NoProfile", "-Command", "Expand-Archive", "-Force", "-Path"])
            .arg(archive)
            .arg("-DestinationPath")
            .arg(dest)
            .status()
    } else {
        Command::new("unzip")
            .arg("-q")
            .arg("-o")
            .arg(archive)
            .arg("-d")
            .arg(dest)
            .status()
    }
    .context("Failed to run OS archiver")?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("OS archiver exited with {status}"))
    }
}

fn mirror_candidates() -> impl Iterator<Item = (&'static str, &'static str, &'static str)> {
    MIRROR_VERSIONS.iter().flat_map(|version| {
        MIRROR_TEMPLATES
            .iter()
            .map(move |(name, template)| (*name, *template, *version))
    })
}

/// Chrome for Testing platform key for this build target
pub fn chrome_for_testing_platform() -> Option<&'static str> {
    if cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        Some("linux64")
    } else if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        Some("mac-arm64")
    } else if cfg!(target_os = "macos") {
        Some("mac-x64")
    } else if cfg!(all(target_os = "windows", target_arch = "x86_64")) {
        Some("win64")
    } else if cfg!(target_os = "windows") {
        Some("win32")
    } else {
        None
    }
}

/// Executable locations relative to one unpacked install
fn executable_candidates() -> &'static [&'static str] {
    if cfg!(target_os = "windows") {
        &["chrome-win/chrome.exe", "chrome-win64/chrome.exe", "chrome-win32/chrome.exe"]
    } else if cfg!(target_os = "macos") {
        &[
            "chrome-mac/Chromium.app/Contents/MacOS/Chromium",
            "chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
        ]
    } else {
        &["chrome-linux/chrome", "chrome-linux64/chrome"]
    }
}

fn find_executable_in(install_dir: &Path) -> Option<PathBuf> {
    let found = executable_candidates()
        .iter()
        .map(|relative| install_dir.join(relative))
        .find(|candidate| candidate.is_file())?;
    mark_executable(&found);
    Some(found)
}

#[cfg(unix)]
fn mark_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0 {
            perms.set_mode(perms.mode() | 0o755);
            let _ = std::fs::set_permissions(path, perms);
        }
    }
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) {}

/// Look for previous downloads in both the fetcher layout
/// (`chromium/<platform>-<revision>/...`) and the mirror layout
/// (`browsers/<version>/...`), newest directory name first.
pub fn scan_install_dirs(cache_dir: &Path) -> Option<PathBuf> {
    for root in [cache_dir.join("chromium"), cache_dir.join("browsers")] {
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();
        dirs.reverse();

        if let Some(found) = dirs.iter().find_map(|dir| find_executable_in(dir)) {
            debug!(path = %found.display(), "Found previously downloaded browser");
            return Some(found);
        }
    }
    None
}

/// Find Chrome/Chromium via `CHROMIUM_PATH`, well-known install paths and
/// `which`.
pub fn find_browser_executable() -> Option<(PathBuf, InstallSource)> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROMIUM_PATH: {}", path.display());
            return Some((path, InstallSource::Environment));
        }
        warn!(
            "CHROMIUM_PATH points to non-existent file: {}",
            path.display()
        );
    }

    let paths: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"%LOCALAPPDATA%\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for raw in paths {
        let path = if let Some(rest) = raw.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            }
        } else if raw.contains('%') {
            PathBuf::from(expand_windows_env_vars(raw))
        } else {
            PathBuf::from(raw)
        };

        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Some((path, InstallSource::System));
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    return Some((PathBuf::from(found), InstallSource::System));
                }
            }
        }
    }

    None
}

/// Expand `%VAR%` tokens, leaving unknown variables untouched
fn expand_windows_env_vars(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut chars = path.chars();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            result.push(ch);
            continue;
        }
        let name: String = chars.by_ref().take_while(|&c| c != '%').collect();
        match std::env::var(&name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => {
                result.push('%');
                result.push_str(&name);
                if !name.is_empty() {
                    result.push('%');
                }
            }
        }
    }

    result
}
