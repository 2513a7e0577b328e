//! One logical browser: a local process or a remote connection, plus the
//! page actions run against its active page.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::layout::Point;
use chromiumoxide_cdp::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide_cdp::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide_cdp::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use futures::StreamExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::remote;
use super::screenshot::capture_data_url;
use super::stabilize::wait_for_stable;
use super::temp::{CleanupOutcome, temp_profile_dir};
use super::wrapper::{BrowserWrapper, LaunchOptions};
use super::{
    BrowserError, BrowserProvisioner, BrowserResult, PageDriver, ScrapeSession, preauth,
    root_domain, stealth,
};
use crate::BrowserConfig;
use crate::preferences::{self, PreferenceStore, keys};
use crate::utils::constants::{CHROME_USER_AGENT, MOBILE_USER_AGENT, TABLET_USER_AGENT};
use crate::utils::timeout::{NAVIGATION_TIMEOUT, POST_CLICK_SETTLE_TIMEOUT, run_with_timeout};

/// Console silence required before the post-action screenshot
pub const CONSOLE_QUIET: Duration = Duration::from_millis(500);
pub const CONSOLE_QUIET_CAP: Duration = Duration::from_secs(3);

/// Window after a click/hover in which a request counts as "triggered"
pub const NETWORK_WATCH_WINDOW: Duration = Duration::from_millis(100);
/// Request silence that counts as network idle once an action fired requests
pub const NETWORK_IDLE: Duration = Duration::from_millis(500);
const NETWORK_IDLE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Launching,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreset {
    Desktop,
    Mobile,
    Tablet,
}

impl DevicePreset {
    /// `(width, height, scale factor, mobile)`
    pub fn metrics(&self) -> (i64, i64, f64, bool) {
        match self {
            DevicePreset::Desktop => (1280, 800, 1.0, false),
            DevicePreset::Mobile => (390, 844, 3.0, true),
            DevicePreset::Tablet => (820, 1180, 2.0, true),
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            DevicePreset::Desktop => CHROME_USER_AGENT,
            DevicePreset::Mobile => MOBILE_USER_AGENT,
            DevicePreset::Tablet => TABLET_USER_AGENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MousePosition {
    pub x: f64,
    pub y: f64,
}

/// Where a click or hover lands
#[derive(Debug, Clone)]
pub enum PointerTarget {
    Selector(String),
    Coordinates { x: f64, y: f64 },
}

#[derive(Debug, Clone, Copy)]
pub enum ScrollTarget {
    By { dx: i64, dy: i64 },
    Bottom,
}

/// Result of one page action
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    /// `data:` URL, absent when both encodings failed
    pub screenshot: Option<String>,
    pub logs: Vec<String>,
    pub current_url: String,
    pub mouse_position: Option<MousePosition>,
}

pub struct BrowserSession {
    provisioner: Arc<BrowserProvisioner>,
    prefs: Arc<dyn PreferenceStore>,
    settings: BrowserConfig,
    client: reqwest::Client,
    state: SessionState,
    mode: SessionMode,
    wrapper: Option<BrowserWrapper>,
    page: Option<Page>,
    stealth_pages: bool,
    mouse: Option<MousePosition>,
}

impl BrowserSession {
    pub fn new(
        provisioner: Arc<BrowserProvisioner>,
        prefs: Arc<dyn PreferenceStore>,
        settings: BrowserConfig,
    ) -> Self {
        Self {
            provisioner,
            prefs,
            settings,
            client: reqwest::Client::new(),
            state: SessionState::Closed,
            mode: SessionMode::Local,
            wrapper: None,
            page: None,
            stealth_pages: false,
            mouse: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Start (or attach to) a browser. A no-op when already ready.
    pub async fn launch(&mut self, headless: bool) -> BrowserResult<()> {
        if self.state == SessionState::Ready {
            return Ok(());
        }
        self.state = SessionState::Launching;

        let launched = if self.prefs.get_bool(keys::USE_REMOTE_BROWSER) {
            match self.connect_remote().await {
                Ok(wrapper) => Ok((wrapper, SessionMode::Remote)),
                Err(e) => {
                    warn!(error = %e, "Remote browser unavailable, launching locally");
                    self.launch_local(headless)
                        .await
                        .map(|w| (w, SessionMode::Local))
                }
            }
        } else {
            self.launch_local(headless)
                .await
                .map(|w| (w, SessionMode::Local))
        };

        match launched {
            Ok((wrapper, mode)) => {
                self.wrapper = Some(wrapper);
                self.mode = mode;
                self.stealth_pages = !headless;
                self.state = SessionState::Ready;
                info!(?mode, headless, "Browser session ready");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn connect_remote(&self) -> BrowserResult<BrowserWrapper> {
        let (wrapper, endpoint) =
            remote::connect_first(self.prefs.as_ref(), &self.client, |url: String| async move {
                BrowserWrapper::connect(&url).await.map_err(anyhow::Error::from)
            })
            .await
            .map_err(|e| BrowserError::ConnectionFailed(format!("{e:#}")))?;
        debug!(source = ?endpoint.source, "Remote browser connected");
        Ok(wrapper)
    }

    async fn launch_local(&self, headless: bool) -> BrowserResult<BrowserWrapper> {
        let executable = self.provisioner.ensure_browser().await?;
        let window = (self.settings.window.width, self.settings.window.height);
        let viewport = preferences::viewport(self.prefs.as_ref(), window);

        let options = if self.prefs.get_bool(keys::PRE_AUTH_BROWSER_ENABLED)
            && !preauth::profile_in_use(&preauth::profile_dir())
        {
            preauth::launch_options(headless, self.settings.disable_security, viewport)
        } else {
            LaunchOptions {
                headless,
                disable_security: self.settings.disable_security,
                viewport,
                user_data_dir: temp_profile_dir(),
                ephemeral_profile: true,
            }
        };
        BrowserWrapper::launch_local(&executable.executable_path, options).await
    }

    fn wrapper(&self) -> BrowserResult<&BrowserWrapper> {
        match (self.state, self.wrapper.as_ref()) {
            (SessionState::Ready, Some(wrapper)) => Ok(wrapper),
            _ => Err(BrowserError::LaunchFailed(
                "browser session is not running".to_string(),
            )),
        }
    }

    /// New blank page, with the anti-detection script when visible
    async fn fresh_page(&self) -> BrowserResult<Page> {
        let page = self.wrapper()?.new_blank_page().await?;
        if self.stealth_pages {
            stealth::install(&page)
                .await
                .map_err(|e| BrowserError::PageCreationFailed(e.to_string()))?;
        }
        Ok(page)
    }

    fn active_page(&self) -> BrowserResult<Page> {
        self.page.clone().ok_or(BrowserError::NoPage)
    }

    /// Page already showing `url`'s root domain, if any
    async fn reusable_page(&self, url: &str) -> BrowserResult<Option<Page>> {
        if let Some(page) = self.page.as_ref() {
            if is_blank(page).await {
                return Ok(Some(page.clone()));
            }
        }

        let Some(target) = root_domain(url) else {
            return Ok(None);
        };

        if let Some(page) = self.page.as_ref() {
            if page_root_domain(page).await.as_deref() == Some(target.as_str()) {
                return Ok(Some(page.clone()));
            }
        }

        for page in self.wrapper()?.pages().await? {
            if page_root_domain(&page).await.as_deref() == Some(target.as_str()) {
                return Ok(Some(page));
            }
        }
        Ok(None)
    }

    /// Navigate, reusing a same-domain page, then wait for the page to
    /// stabilize. A navigation timeout is tolerated; the page keeps loading.
    pub async fn navigate_to_url(&mut self, url: &str) -> BrowserResult<()> {
        let page = match self.reusable_page(url).await? {
            Some(page) => {
                debug!(url, "Reusing same-domain page");
                page
            }
            None => self.fresh_page().await?,
        };

        match run_with_timeout(NAVIGATION_TIMEOUT, PageDriver::goto(&page, url)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(BrowserError::NavigationFailed(format!("{e:#}"))),
            None => warn!(url, "Navigation timed out, continuing with partial load"),
        }

        let settled = wait_for_stable(&page).await;
        debug!(url, polls = settled.polls, stable = settled.stable, "Navigation settled");
        self.page = Some(page);
        Ok(())
    }

    /// Run `action` against the active page with console capture, then
    /// screenshot once the console has gone quiet.
    pub async fn do_action<F>(&mut self, action: F) -> BrowserResult<ActionOutcome>
    where
        F: for<'p> FnOnce(&'p Page) -> BoxFuture<'p, anyhow::Result<()>>,
    {
        self.run_action(false, action).await
    }

    async fn run_action<F>(&mut self, watch_network: bool, action: F) -> BrowserResult<ActionOutcome>
    where
        F: for<'p> FnOnce(&'p Page) -> BoxFuture<'p, anyhow::Result<()>>,
    {
        let page = self.active_page()?;
        let console = ConsoleCapture::attach(&page).await?;
        let network = if watch_network {
            Some(NetworkWatch::attach(&page).await?)
        } else {
            None
        };

        let result = action(&page).await;

        if let Some(network) = network {
            network.settle(&page).await;
        }
        console.wait_for_quiet().await;
        let logs = console.detach();

        result.map_err(|e| BrowserError::ActionFailed(format!("{e:#}")))?;

        let screenshot = match capture_data_url(&page).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "Post-action screenshot failed");
                None
            }
        };
        let current_url = PageDriver::current_url(&page).await.unwrap_or_default();

        Ok(ActionOutcome {
            screenshot,
            logs,
            current_url,
            mouse_position: self.mouse,
        })
    }

    async fn resolve_point(&self, target: &PointerTarget) -> BrowserResult<Point> {
        match target {
            PointerTarget::Coordinates { x, y } => Ok(Point { x: *x, y: *y }),
            PointerTarget::Selector(selector) => {
                let page = self.active_page()?;
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|e| BrowserError::ActionFailed(format!("'{selector}': {e}")))?;
                element
                    .scroll_into_view()
                    .await
                    .map_err(|e| BrowserError::ActionFailed(e.to_string()))?;
                element
                    .clickable_point()
                    .await
                    .map_err(|e| BrowserError::ActionFailed(e.to_string()))
            }
        }
    }

    pub async fn navigate(&mut self, url: &str) -> BrowserResult<ActionOutcome> {
        self.navigate_to_url(url).await?;
        self.do_action(|_| Box::pin(async { Ok(()) })).await
    }

    pub async fn click(&mut self, target: PointerTarget) -> BrowserResult<ActionOutcome> {
        let point = self.resolve_point(&target).await?;
        self.mouse = Some(MousePosition {
            x: point.x,
            y: point.y,
        });
        self.run_action(true, move |page| {
            Box::pin(async move {
                page.click(point).await?;
                Ok(())
            })
        })
        .await
    }

    pub async fn hover(&mut self, target: PointerTarget) -> BrowserResult<ActionOutcome> {
        let point = self.resolve_point(&target).await?;
        self.mouse = Some(MousePosition {
            x: point.x,
            y: point.y,
        });
        self.run_action(true, move |page| {
            Box::pin(async move {
                page.move_mouse(point).await?;
                Ok(())
            })
        })
        .await
    }

    pub async fn type_text(&mut self, selector: &str, text: &str) -> BrowserResult<ActionOutcome> {
        let (selector, text) = (selector.to_string(), text.to_string());
        self.do_action(move |page| {
            Box::pin(async move {
                if !PageDriver::type_text(page, &selector, &text).await? {
                    anyhow::bail!("no element matches '{selector}'");
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn press_key(&mut self, selector: &str, key: &str) -> BrowserResult<ActionOutcome> {
        let (selector, key) = (selector.to_string(), key.to_string());
        self.do_action(move |page| {
            Box::pin(async move {
                if !PageDriver::press_key(page, &selector, &key).await? {
                    anyhow::bail!("no element matches '{selector}'");
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn scroll(&mut self, target: ScrollTarget) -> BrowserResult<ActionOutcome> {
        self.do_action(move |page| {
            Box::pin(async move {
                match target {
                    ScrollTarget::By { dx, dy } => PageDriver::scroll_by(page, dx, dy).await,
                    ScrollTarget::Bottom => PageDriver::scroll_to_bottom(page).await,
                }
            })
        })
        .await
    }

    pub async fn screenshot(&mut self) -> BrowserResult<ActionOutcome> {
        self.do_action(|_| Box::pin(async { Ok(()) })).await
    }

    pub async fn resize(&mut self, width: u32, height: u32) -> BrowserResult<ActionOutcome> {
        self.do_action(move |page| {
            Box::pin(async move {
                page.execute(SetDeviceMetricsOverrideParams::new(
                    i64::from(width),
                    i64::from(height),
                    1.0,
                    false,
                ))
                .await?;
                Ok(())
            })
        })
        .await
    }

    pub async fn emulate(&mut self, preset: DevicePreset) -> BrowserResult<ActionOutcome> {
        self.do_action(move |page| {
            Box::pin(async move {
                let (width, height, scale, mobile) = preset.metrics();
                page.execute(SetDeviceMetricsOverrideParams::new(
                    width, height, scale, mobile,
                ))
                .await?;
                page.execute(SetUserAgentOverrideParams::new(preset.user_agent()))
                    .await?;
                Ok(())
            })
        })
        .await
    }

    /// Close the session. Remote: disconnect only. Local: stop the process
    /// and remove a temporary profile.
    pub async fn close(&mut self) -> CleanupOutcome {
        self.page = None;
        self.mouse = None;
        self.state = SessionState::Closed;
        match self.wrapper.take() {
            Some(wrapper) => wrapper.shutdown().await,
            None => CleanupOutcome::Removed,
        }
    }
}

#[async_trait]
impl ScrapeSession for BrowserSession {
    async fn open_blank(&mut self) -> BrowserResult<()> {
        if self.page.is_none() {
            self.page = Some(self.fresh_page().await?);
        }
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.navigate_to_url(url).await
    }

    fn page(&self) -> BrowserResult<&dyn PageDriver> {
        self.page
            .as_ref()
            .map(|page| page as &dyn PageDriver)
            .ok_or(BrowserError::NoPage)
    }

    async fn close(&mut self) -> BrowserResult<()> {
        let outcome = BrowserSession::close(self).await;
        if !outcome.is_clean() {
            warn!(?outcome, "Session closed with leftover profile");
        }
        Ok(())
    }
}

async fn is_blank(page: &Page) -> bool {
    match page.url().await {
        Ok(None) => true,
        Ok(Some(url)) => url == "about:blank",
        Err(_) => false,
    }
}

async fn page_root_domain(page: &Page) -> Option<String> {
    let url = page.url().await.ok().flatten()?;
    root_domain(&url)
}

/// Console and exception listeners for the duration of one action
struct ConsoleCapture {
    logs: Arc<Mutex<Vec<String>>>,
    last_event: Arc<Mutex<Instant>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsoleCapture {
    async fn attach(page: &Page) -> BrowserResult<Self> {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let last_event = Arc::new(Mutex::new(Instant::now()));

        let mut console = page
            .event_listener::<EventConsoleApiCalled>()
            .await
            .map_err(|e| BrowserError::ActionFailed(format!("console listener: {e}")))?;
        let mut exceptions = page
            .event_listener::<EventExceptionThrown>()
            .await
            .map_err(|e| BrowserError::ActionFailed(format!("exception listener: {e}")))?;

        let (console_logs, console_seen) = (logs.clone(), last_event.clone());
        let console_task = tokio::spawn(async move {
            while let Some(event) = console.next().await {
                let text = event
                    .args
                    .iter()
                    .map(|arg| {
                        arg.value
                            .as_ref()
                            .map(|v| match v {
                                serde_json::Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .or_else(|| arg.description.clone())
                            .unwrap_or_default()
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                console_logs
                    .lock()
                    .push(format!("[{:?}] {}", event.r#type, text));
                *console_seen.lock() = Instant::now();
            }
        });

        let (error_logs, error_seen) = (logs.clone(), last_event.clone());
        let exception_task = tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let description = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                error_logs.lock().push(format!("[exception] {description}"));
                *error_seen.lock() = Instant::now();
            }
        });

        Ok(Self {
            logs,
            last_event,
            tasks: vec![console_task, exception_task],
        })
    }

    async fn wait_for_quiet(&self) {
        wait_for_console_quiet(&self.last_event).await;
    }

    fn detach(self) -> Vec<String> {
        for task in &self.tasks {
            task.abort();
        }
        std::mem::take(&mut *self.logs.lock())
    }
}

/// Request counter used to decide whether a pointer action needs settling
struct NetworkWatch {
    requests: Arc<Mutex<(usize, Instant)>>,
    task: JoinHandle<()>,
}

impl NetworkWatch {
    async fn attach(page: &Page) -> BrowserResult<Self> {
        let requests = Arc::new(Mutex::new((0usize, Instant::now())));
        let mut events = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| BrowserError::ActionFailed(format!("network listener: {e}")))?;
        let seen = requests.clone();
        let task = tokio::spawn(async move {
            while events.next().await.is_some() {
                let mut guard = seen.lock();
                guard.0 += 1;
                guard.1 = Instant::now();
            }
        });
        Ok(Self { requests, task })
    }

    /// If the action fired requests, wait for navigation or network idle
    async fn settle(self, page: &Page) {
        let navigation = async {
            let _ = page.wait_for_navigation().await;
        };
        match settle_requests(&self.requests, navigation).await {
            SettleOutcome::Skipped => {}
            SettleOutcome::TimedOut => debug!("Post-action settle timed out"),
            outcome => debug!(?outcome, "Post-action network settled"),
        }
        self.task.abort();
    }
}

/// Sleep until the console has been silent for [`CONSOLE_QUIET`], giving up
/// after [`CONSOLE_QUIET_CAP`]
async fn wait_for_console_quiet(last_event: &Mutex<Instant>) {
    let started = Instant::now();
    loop {
        let quiet_for = last_event.lock().elapsed();
        if quiet_for >= CONSOLE_QUIET {
            return;
        }
        let remaining_cap = CONSOLE_QUIET_CAP.saturating_sub(started.elapsed());
        if remaining_cap.is_zero() {
            return;
        }
        tokio::time::sleep((CONSOLE_QUIET - quiet_for).min(remaining_cap)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleOutcome {
    /// No request fired inside the watch window
    Skipped,
    Navigated,
    Idle,
    TimedOut,
}

/// Wait out [`NETWORK_WATCH_WINDOW`]; if requests were counted, race
/// `navigation` against [`NETWORK_IDLE`] under the post-click timeout
async fn settle_requests<N>(requests: &Mutex<(usize, Instant)>, navigation: N) -> SettleOutcome
where
    N: Future<Output = ()>,
{
    tokio::time::sleep(NETWORK_WATCH_WINDOW).await;
    if requests.lock().0 == 0 {
        return SettleOutcome::Skipped;
    }

    debug!("Action triggered network activity, waiting to settle");
    let idle = async {
        loop {
            tokio::time::sleep(NETWORK_IDLE_POLL).await;
            if requests.lock().1.elapsed() >= NETWORK_IDLE {
                return;
            }
        }
    };
    let settled = run_with_timeout(POST_CLICK_SETTLE_TIMEOUT, async {
        tokio::select! {
            _ = navigation => SettleOutcome::Navigated,
            _ = idle => SettleOutcome::Idle,
        }
    })
    .await;
    settled.unwrap_or(SettleOutcome::TimedOut)
}
