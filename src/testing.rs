//! Scripted fakes for the browser seams, shared by unit tests

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::browser::{
    BrowserError, BrowserResult, ImageFormat, PageDriver, ScrapeSession, SessionFactory,
};

/// Events that move a [`FakePage`] to its next HTML stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Advance {
    HtmlRead,
    Scroll,
    Click,
    Goto,
}

#[derive(Default)]
struct FakeState {
    stages: Vec<String>,
    stage: usize,
    advance_on: HashSet<Advance>,
    url: String,
    lengths: VecDeque<usize>,
    last_length: usize,
    counts: HashMap<String, VecDeque<usize>>,
    last_counts: HashMap<String, usize>,
    evaluations: HashMap<String, Value>,
    screenshots: HashMap<&'static str, Vec<u8>>,
    screenshot_calls: Vec<ImageFormat>,
    gotos: Vec<String>,
    clicks: Vec<(String, usize)>,
    typed: Vec<(String, String)>,
    keys: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    cleared_cookie_domains: Vec<String>,
    scroll_count: usize,
}

impl FakeState {
    fn advance(&mut self, trigger: Advance) {
        if self.advance_on.contains(&trigger) && self.stage + 1 < self.stages.len() {
            self.stage += 1;
        }
    }

    fn current_html(&self) -> String {
        self.stages.get(self.stage).cloned().unwrap_or_default()
    }

    fn count(&mut self, selector: &str) -> usize {
        if let Some(queue) = self.counts.get_mut(selector) {
            if let Some(next) = queue.pop_front() {
                self.last_counts.insert(selector.to_string(), next);
                return next;
            }
            return self.last_counts.get(selector).copied().unwrap_or(0);
        }
        let Ok(parsed) = scraper::Selector::parse(selector) else {
            return 0;
        };
        let document = scraper::Html::parse_document(&self.current_html());
        document.select(&parsed).count()
    }
}

/// In-memory page whose DOM is a list of HTML stages
#[derive(Default)]
pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_html(html: impl Into<String>) -> Self {
        let page = Self::new();
        page.set_stages(vec![html.into()]);
        page
    }

    pub fn set_stages(&self, stages: Vec<String>) {
        let mut state = self.state.lock();
        state.stages = stages;
        state.stage = 0;
    }

    pub fn advance_on(&self, trigger: Advance) {
        self.state.lock().advance_on.insert(trigger);
    }

    pub fn set_url(&self, url: &str) {
        self.state.lock().url = url.to_string();
    }

    pub fn set_length_sequence(&self, lengths: Vec<usize>) {
        self.state.lock().lengths = lengths.into();
    }

    pub fn set_count_sequence(&self, selector: &str, counts: Vec<usize>) {
        self.state
            .lock()
            .counts
            .insert(selector.to_string(), counts.into());
    }

    pub fn set_evaluation(&self, expression: &str, value: Value) {
        self.state
            .lock()
            .evaluations
            .insert(expression.to_string(), value);
    }

    pub fn set_screenshot(&self, format: ImageFormat, bytes: Vec<u8>) {
        self.state.lock().screenshots.insert(format.mime(), bytes);
    }

    pub fn screenshot_calls(&self) -> Vec<ImageFormat> {
        self.state.lock().screenshot_calls.clone()
    }

    pub fn gotos(&self) -> Vec<String> {
        self.state.lock().gotos.clone()
    }

    pub fn clicks(&self) -> Vec<(String, usize)> {
        self.state.lock().clicks.clone()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state.lock().typed.clone()
    }

    pub fn headers(&self) -> BTreeMap<String, String> {
        self.state.lock().headers.clone()
    }

    pub fn cleared_cookie_domains(&self) -> Vec<String> {
        self.state.lock().cleared_cookie_domains.clone()
    }

    pub fn scroll_count(&self) -> usize {
        self.state.lock().scroll_count
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.gotos.push(url.to_string());
        state.url = url.to_string();
        state.advance(Advance::Goto);
        Ok(())
    }

    async fn current_url(&self) -> anyhow::Result<String> {
        Ok(self.state.lock().url.clone())
    }

    async fn html(&self) -> anyhow::Result<String> {
        let mut state = self.state.lock();
        let html = state.current_html();
        state.advance(Advance::HtmlRead);
        Ok(html)
    }

    async fn html_length(&self) -> anyhow::Result<usize> {
        let mut state = self.state.lock();
        if let Some(next) = state.lengths.pop_front() {
            state.last_length = next;
            return Ok(next);
        }
        if state.last_length > 0 {
            return Ok(state.last_length);
        }
        Ok(state.current_html().len())
    }

    async fn evaluate(&self, expression: &str) -> anyhow::Result<Value> {
        Ok(self
            .state
            .lock()
            .evaluations
            .get(expression)
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn count(&self, selector: &str) -> anyhow::Result<usize> {
        Ok(self.state.lock().count(selector))
    }

    async fn click_nth(&self, selector: &str, index: usize) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.count(selector) <= index {
            return Ok(false);
        }
        state.clicks.push((selector.to_string(), index));
        state.advance(Advance::Click);
        Ok(true)
    }

    async fn scroll_nth_into_view(&self, selector: &str, index: usize) -> anyhow::Result<bool> {
        Ok(self.state.lock().count(selector) > index)
    }

    async fn type_text(&self, selector: &str, text: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.count(selector) == 0 {
            return Ok(false);
        }
        state.typed.push((selector.to_string(), text.to_string()));
        Ok(true)
    }

    async fn press_key(&self, selector: &str, key: &str) -> anyhow::Result<bool> {
        let mut state = self.state.lock();
        if state.count(selector) == 0 {
            return Ok(false);
        }
        state.keys.push((selector.to_string(), key.to_string()));
        Ok(true)
    }

    async fn scroll_by(&self, _dx: i64, _dy: i64) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.scroll_count += 1;
        state.advance(Advance::Scroll);
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        state.scroll_count += 1;
        state.advance(Advance::Scroll);
        Ok(())
    }

    async fn screenshot(&self, format: ImageFormat) -> anyhow::Result<Vec<u8>> {
        let mut state = self.state.lock();
        state.screenshot_calls.push(format);
        Ok(state
            .screenshots
            .get(format.mime())
            .cloned()
            .unwrap_or_default())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> anyhow::Result<()> {
        self.state.lock().headers.extend(headers.clone());
        Ok(())
    }

    async fn clear_cookies(&self, domain: &str) -> anyhow::Result<usize> {
        self.state
            .lock()
            .cleared_cookie_domains
            .push(domain.to_string());
        Ok(0)
    }
}

/// Session over a shared [`FakePage`]; records navigation and close
pub struct FakeSession {
    page: Arc<FakePage>,
    closed: Arc<AtomicBool>,
}

impl FakeSession {
    pub fn new(page: Arc<FakePage>) -> Self {
        Self {
            page,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }
}

#[async_trait]
impl ScrapeSession for FakeSession {
    async fn open_blank(&mut self) -> BrowserResult<()> {
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))
    }

    fn page(&self) -> BrowserResult<&dyn PageDriver> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::NoPage);
        }
        Ok(&*self.page)
    }

    async fn close(&mut self) -> BrowserResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out sessions over pre-built pages, one per `open` call in order
#[derive(Default)]
pub struct FakeFactory {
    pages: Mutex<VecDeque<Arc<FakePage>>>,
    opened: AtomicUsize,
    close_flags: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeFactory {
    pub fn new(pages: Vec<Arc<FakePage>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn all_closed(&self) -> bool {
        self.close_flags
            .lock()
            .iter()
            .all(|flag| flag.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, _headless: bool) -> BrowserResult<Box<dyn ScrapeSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let page = self
            .pages
            .lock()
            .pop_front()
            .unwrap_or_else(|| Arc::new(FakePage::new()));
        let session = FakeSession::new(page);
        self.close_flags.lock().push(session.closed_flag());
        Ok(Box::new(session))
    }
}
