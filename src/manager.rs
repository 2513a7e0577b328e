//! Owner of the shared browser resources
//!
//! Each search gets its own session and process; what is shared is the
//! provisioner (one download at a time), the host preferences, the file
//! registry and any temp browsers opened for the user.
//!
//! # Async Lock Requirements
//!
//! The temp-browser table uses `tokio::sync::Mutex` since shutdown awaits
//! while holding it.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::Config;
use crate::browser::temp::{CleanupOutcome, TempBrowser, launch_temp_browser};
use crate::browser::{
    BrowserProvisioner, BrowserResult, BrowserSession, BrowserWrapper, ScrapeSession,
    SessionFactory, preauth,
};
use crate::browser_setup::ProvisionerSettings;
use crate::preferences::{self, FilePreferences, MemoryPreferences, PreferenceStore};
use crate::registry::FileRegistry;

static GLOBAL_MANAGER: OnceLock<Arc<BrowserManager>> = OnceLock::new();

pub struct BrowserManager {
    config: Config,
    provisioner: Arc<BrowserProvisioner>,
    prefs: Arc<dyn PreferenceStore>,
    registry: Arc<FileRegistry>,
    temp_browsers: Mutex<HashMap<String, TempBrowser>>,
}

impl BrowserManager {
    pub fn new(config: Config, prefs: Arc<dyn PreferenceStore>) -> Self {
        let provisioner = Arc::new(BrowserProvisioner::new(ProvisionerSettings::from_config(
            &config.provisioner,
        )));
        Self {
            config,
            provisioner,
            prefs,
            registry: Arc::new(FileRegistry::default()),
            temp_browsers: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide manager built from `config.yaml` and the preferences file
    #[must_use]
    pub fn global() -> Arc<BrowserManager> {
        GLOBAL_MANAGER
            .get_or_init(|| {
                let config = crate::load_yaml_config().unwrap_or_else(|e| {
                    warn!("Falling back to default config: {e:#}");
                    Config::default()
                });
                let prefs: Arc<dyn PreferenceStore> =
                    match FilePreferences::open(FilePreferences::default_path()) {
                        Ok(prefs) => Arc::new(prefs),
                        Err(e) => {
                            warn!("Preferences unavailable, using in-memory store: {e:#}");
                            Arc::new(MemoryPreferences::new())
                        }
                    };
                Arc::new(BrowserManager::new(config, prefs))
            })
            .clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provisioner(&self) -> &Arc<BrowserProvisioner> {
        &self.provisioner
    }

    pub fn prefs(&self) -> &Arc<dyn PreferenceStore> {
        &self.prefs
    }

    pub fn registry(&self) -> &Arc<FileRegistry> {
        &self.registry
    }

    fn viewport(&self) -> (u32, u32) {
        let window = &self.config.browser.window;
        preferences::viewport(self.prefs.as_ref(), (window.width, window.height))
    }

    /// Unlaunched session wired to this manager's resources
    pub fn new_session(&self) -> BrowserSession {
        BrowserSession::new(
            self.provisioner.clone(),
            self.prefs.clone(),
            self.config.browser.clone(),
        )
    }

    /// Open a throwaway visible browser, tracked until closed or shutdown
    pub async fn open_temp_browser(&self, url: Option<&str>) -> BrowserResult<String> {
        let executable = self.provisioner.ensure_browser().await?;
        let browser = launch_temp_browser(&executable, self.viewport(), url).await?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.temp_browsers.lock().await.insert(id.clone(), browser);
        info!(id = %id, "Temp browser opened");
        Ok(id)
    }

    pub async fn close_temp_browser(&self, id: &str) -> Option<CleanupOutcome> {
        let browser = self.temp_browsers.lock().await.remove(id)?;
        Some(browser.close().await)
    }

    /// Visible window on the persistent pre-auth profile
    pub async fn open_login_window(&self, login_url: &str) -> BrowserResult<BrowserWrapper> {
        let executable = self.provisioner.ensure_browser().await?;
        preauth::open_login_window(&executable, self.viewport(), login_url).await
    }

    /// Close every tracked temp browser and drop expired registrations
    pub async fn shutdown(&self) -> Vec<CleanupOutcome> {
        let browsers: Vec<TempBrowser> = self
            .temp_browsers
            .lock()
            .await
            .drain()
            .map(|(_, browser)| browser)
            .collect();

        let mut outcomes = Vec::with_capacity(browsers.len());
        for browser in browsers {
            outcomes.push(browser.close().await);
        }
        self.registry.evict_expired();
        outcomes
    }
}

#[async_trait]
impl SessionFactory for BrowserManager {
    async fn open(&self, headless: bool) -> BrowserResult<Box<dyn ScrapeSession>> {
        let mut session = self.new_session();
        session.launch(headless).await?;
        Ok(Box::new(session))
    }
}
