//! Host preferences consumed by the browser layer
//!
//! The host application owns its settings store; this crate only needs
//! "get/set a named flag". [`PreferenceStore`] is that contract, with an
//! in-memory implementation and a YAML file one for the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};


pub mod keys {
    pub const USE_REMOTE_BROWSER: &str = "use_remote_browser";
    pub const REMOTE_BROWSER_HOST: &str = "remote_browser_host";
    pub const PRE_AUTH_BROWSER_ENABLED: &str = "pre_auth_browser_enabled";
    pub const BROWSER_VIEWPORT: &str = "browser_viewport";
    pub const REMOTE_ENDPOINT_CACHE: &str = "remote_browser_endpoint_cache";
}

/// How long a discovered remote endpoint is trusted without re-probing
pub const ENDPOINT_CACHE_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Bool(bool),
    Text(String),
}

pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<PrefValue>;

    fn set(&self, key: &str, value: PrefValue) -> Result<()>;

    fn get_bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(PrefValue::Bool(value)) => value,
            Some(PrefValue::Text(text)) => matches!(text.trim(), "true" | "1" | "yes"),
            None => false,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(PrefValue::Text(text)) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, PrefValue::Bool(value))
    }

    fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, PrefValue::Text(value.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Preferences persisted as a flat YAML mapping
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: RwLock<BTreeMap<String, PrefValue>>,
}

impl FilePreferences {
    /// Load `path`, starting empty when the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read preferences {}", path.display()))?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&text)
                    .with_context(|| format!("Invalid preferences file {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "Loaded preferences");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    /// `<data dir>/kodegen/websearch/preferences.yaml`
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("kodegen")
            .join("websearch")
            .join("preferences.yaml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, PrefValue>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(values)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write preferences {}", self.path.display()))
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<PrefValue> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: PrefValue) -> Result<()> {
        let mut values = self.values.write();
        values.insert(key.to_string(), value);
        self.persist(&values)
    }
}

/// Viewport from the `"WxH"` preference, else `fallback`
pub fn viewport(store: &dyn PreferenceStore, fallback: (u32, u32)) -> (u32, u32) {
    match store.get_string(keys::BROWSER_VIEWPORT) {
        Some(raw) => parse_viewport(&raw).unwrap_or_else(|| {
            warn!(value = %raw, "Malformed viewport preference, using default");
            fallback
        }),
        None => fallback,
    }
}

pub fn parse_viewport(raw: &str) -> Option<(u32, u32)> {
    let (w, h) = raw.trim().split_once(['x', 'X'])?;
    let width = w.trim().parse::<u32>().ok().filter(|v| *v > 0)?;
    let height = h.trim().parse::<u32>().ok().filter(|v| *v > 0)?;
    Some((width, height))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCache {
    pub endpoint: String,
    pub saved_at: DateTime<Utc>,
}

impl EndpointCache {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.saved_at) < Duration::minutes(ENDPOINT_CACHE_TTL_MINUTES)
    }
}

/// Cached remote endpoint, if present and younger than an hour
pub fn cached_endpoint(store: &dyn PreferenceStore, now: DateTime<Utc>) -> Option<String> {
    let raw = store.get_string(keys::REMOTE_ENDPOINT_CACHE)?;
    let cache: EndpointCache = serde_json::from_str(&raw).ok()?;
    cache.is_fresh(now).then_some(cache.endpoint)
}

/// Forget the cached endpoint, e.g. after it refused a connection
pub fn clear_endpoint(store: &dyn PreferenceStore) -> Result<()> {
    store.set_string(keys::REMOTE_ENDPOINT_CACHE, "")
}

pub fn save_endpoint(store: &dyn PreferenceStore, endpoint: &str, now: DateTime<Utc>) -> Result<()> {
    let cache = EndpointCache {
        endpoint: endpoint.to_string(),
        saved_at: now,
    };
    store.set_string(keys::REMOTE_ENDPOINT_CACHE, &serde_json::to_string(&cache)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::DEFAULT_VIEWPORT;

    #[test]
    fn viewport_parses_and_falls_back() {
        let prefs = MemoryPreferences::new();
        assert_eq!(viewport(&prefs, DEFAULT_VIEWPORT), DEFAULT_VIEWPORT);

        prefs.set_string(keys::BROWSER_VIEWPORT, "1440x900").unwrap();
        assert_eq!(viewport(&prefs, DEFAULT_VIEWPORT), (1440, 900));

        prefs.set_string(keys::BROWSER_VIEWPORT, "wide").unwrap();
        assert_eq!(viewport(&prefs, (1024, 768)), (1024, 768));

        assert_eq!(parse_viewport("0x900"), None);
        assert_eq!(parse_viewport(" 800 X 600 "), Some((800, 600)));
    }

    #[test]
    fn endpoint_cache_expires_after_an_hour() {
        let prefs = MemoryPreferences::new();
        let saved = Utc::now();
        save_endpoint(&prefs, "ws://127.0.0.1:9222/devtools/browser/abc", saved).unwrap();

        assert_eq!(
            cached_endpoint(&prefs, saved + Duration::minutes(59)).as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );
        assert_eq!(cached_endpoint(&prefs, saved + Duration::minutes(61)), None);
    }

    #[test]
    fn bool_accepts_textual_values() {
        let prefs = MemoryPreferences::new();
        assert!(!prefs.get_bool(keys::USE_REMOTE_BROWSER));
        prefs.set_string(keys::USE_REMOTE_BROWSER, "true").unwrap();
        assert!(prefs.get_bool(keys::USE_REMOTE_BROWSER));
    }

    #[test]
    fn file_preferences_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.yaml");

        let prefs = FilePreferences::open(&path).unwrap();
        prefs.set_bool(keys::PRE_AUTH_BROWSER_ENABLED, true).unwrap();
        prefs.set_string(keys::REMOTE_BROWSER_HOST, "10.0.0.5:9222").unwrap();

        let reopened = FilePreferences::open(&path).unwrap();
        assert!(reopened.get_bool(keys::PRE_AUTH_BROWSER_ENABLED));
        assert_eq!(
            reopened.get_string(keys::REMOTE_BROWSER_HOST).as_deref(),
            Some("10.0.0.5:9222")
        );
    }
}
