//! Browser-driven web search for AI agents
//!
//! Runs searches across general engines with ordered fallback, scrapes
//! content platforms that need a real (often logged-in) browser, and turns
//! arbitrary pages into markdown. Browsers are launched via chromiumoxide.

pub mod browser;
pub mod browser_setup;
pub mod content;
mod manager;
pub mod platforms;
pub mod preferences;
pub mod registry;
mod utils;
pub mod web_search;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use anyhow::Context;

use crate::utils::constants::DEFAULT_VIEWPORT;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "KODEGEN_WEBSEARCH_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    #[serde(default)]
    pub platforms: PlatformsConfig,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run browser in headless mode for interactive sessions
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// WARNING: Only enable for trusted content
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    /// Window dimensions, used when the viewport preference is unset
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// General engines, tried in order
    #[serde(default = "default_engine_priority")]
    pub engine_priority: Vec<String>,

    #[serde(default = "default_page_limit")]
    pub default_page_limit: u32,

    /// Search sessions are visible unless this is set
    #[serde(default)]
    pub headless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Defaults to `<cache>/kodegen/websearch`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,

    #[serde(default = "default_reach_timeout_secs")]
    pub reach_timeout_secs: u64,

    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformsConfig {
    #[serde(default = "default_include_comments")]
    pub include_comments: bool,

    /// Leading posts whose comments are expanded
    #[serde(default = "default_max_comment_items")]
    pub max_comment_items: usize,

    /// Top-level comments kept per post
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    false // SECURE BY DEFAULT
}

fn default_window_width() -> u32 {
    DEFAULT_VIEWPORT.0
}

fn default_window_height() -> u32 {
    DEFAULT_VIEWPORT.1
}

fn default_engine_priority() -> Vec<String> {
    web_search::engines::DEFAULT_ENGINE_PRIORITY
        .iter()
        .map(|name| name.to_string())
        .collect()
}

fn default_page_limit() -> u32 {
    1
}

fn default_max_wait_secs() -> u64 {
    60
}

fn default_reach_timeout_secs() -> u64 {
    3
}

fn default_download_timeout_secs() -> u64 {
    300
}

fn default_include_comments() -> bool {
    true
}

fn default_max_comment_items() -> usize {
    5
}

fn default_max_comments() -> usize {
    20
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engine_priority: default_engine_priority(),
            default_page_limit: default_page_limit(),
            headless: false,
        }
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            max_wait_secs: default_max_wait_secs(),
            reach_timeout_secs: default_reach_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            include_comments: default_include_comments(),
            max_comment_items: default_max_comment_items(),
            max_comments: default_max_comments(),
        }
    }
}

/// Config file path: `$KODEGEN_WEBSEARCH_CONFIG`, else `config.yaml` in the
/// package root
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml"))
}

/// Load config from [`config_path`], defaulting when the file is absent
pub fn load_yaml_config() -> anyhow::Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        parse_config(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))
    } else {
        Ok(Config::default())
    }
}

pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    Ok(serde_yaml::from_str(contents)?)
}

pub use browser::{
    BrowserError, BrowserProvisioner, BrowserResult, BrowserSession, BrowserWrapper,
    find_browser_executable,
};
pub use content::ContentFetcher;
pub use manager::BrowserManager;
pub use platforms::{PlatformComment, PlatformPost, PlatformReport, PostKind};
pub use registry::FileRegistry;
pub use utils::SearchError;
pub use utils::retry::RetryPolicy;
pub use web_search::{Platform, SearchOutcome, SearchQuery, SearchResult, search};
