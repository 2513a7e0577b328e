//! Platform scrapers
//!
//! Each platform follows the same state machine:
//!
//! ```text
//! Init -> Navigated -> AwaitingContent -> Extracting -> Paginating|Scrolling -> Done
//!                            |                                                   ^
//!                            +------------------ no-results marker --------------+
//! ```
//!
//! Any unrecoverable step ends in `Failed`. Content polling is generous so a
//! user can log in through the visible window while the scraper waits.

pub mod reddit;
mod weibo;
mod xiaohongshu;
mod zhihu;

pub use reddit::RedditScraper;
pub use weibo::WeiboScraper;
pub use xiaohongshu::XiaohongshuScraper;
pub use zhihu::ZhihuScraper;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{PageDriver, ScrapeSession, stabilize};
use crate::utils::retry::{
    Attempt, CONTENT_POLL_POLICY, NEXT_PAGE_POLICY, SCROLL_POLICY, retry_until,
};
use crate::utils::wait_for_selector;
use crate::web_search::engines::collapse_whitespace;
use crate::web_search::types::{Platform, SearchQuery, truncate_chars};

/// Content polls that must fail before the no-results marker is trusted
pub const NO_RESULTS_GRACE_POLLS: u32 = 2;

/// Consecutive scroll rounds without new items before giving up
pub const MAX_STALLED_SCROLLS: u32 = 3;

/// Wait for items after following a next-page link
const PAGE_RENDER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Note,
    Answer,
    Microblog,
    Post,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformComment {
    pub author: String,
    pub content: String,
    pub time: String,
    pub like_count: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_link: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub replies: Vec<PlatformComment>,
}

impl PlatformComment {
    /// This comment plus every nested reply
    pub fn total(&self) -> usize {
        1 + self.replies.iter().map(PlatformComment::total).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPost {
    pub kind: PostKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub author: String,
    pub publish_time: String,
    pub link: String,
    pub content: String,
    /// Counts as displayed, e.g. `"1.2k"`
    pub engagement: BTreeMap<String, String>,
    pub comments: Vec<PlatformComment>,
}

impl PlatformPost {
    pub fn new(kind: PostKind, link: impl Into<String>) -> Self {
        Self {
            kind,
            title: None,
            author: String::new(),
            publish_time: String::new(),
            link: link.into(),
            content: String::new(),
            engagement: BTreeMap::new(),
            comments: Vec::new(),
        }
    }

    fn engage(&mut self, key: &str, value: Option<String>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.engagement.insert(key.to_string(), value);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformReport {
    pub platform: Platform,
    pub query: String,
    pub posts: Vec<PlatformPost>,
    pub no_results: bool,
}

impl PlatformReport {
    pub fn render_markdown(&self) -> String {
        if self.no_results || self.posts.is_empty() {
            return format!("## {} results for \"{}\"\n\nNo results found.\n", self.platform, self.query);
        }

        let mut out = format!(
            "## {} results for \"{}\" ({} posts)\n\n",
            self.platform,
            self.query,
            self.posts.len()
        );
        for (n, post) in self.posts.iter().enumerate() {
            let heading = post
                .title
                .clone()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| truncate_chars(&post.content, 60));
            out.push_str(&format!("### {}. [{}]({})\n", n + 1, heading, post.link));

            let mut meta = Vec::new();
            if !post.author.is_empty() {
                meta.push(format!("by {}", post.author));
            }
            if !post.publish_time.is_empty() {
                meta.push(post.publish_time.clone());
            }
            meta.extend(post.engagement.iter().map(|(k, v)| format!("{k}: {v}")));
            if !meta.is_empty() {
                out.push_str(&format!("_{}_\n", meta.join(" · ")));
            }
            if !post.content.is_empty() {
                out.push_str(&format!("\n{}\n", post.content));
            }
            if !post.comments.is_empty() {
                out.push_str("\n**Comments**\n");
                render_comments(&mut out, &post.comments, 0);
            }
            out.push('\n');
        }
        out
    }
}

fn render_comments(out: &mut String, comments: &[PlatformComment], depth: usize) {
    for comment in comments {
        out.push_str(&format!(
            "{}- **{}**: {}\n",
            "  ".repeat(depth),
            comment.author,
            collapse_whitespace(&comment.content)
        ));
        render_comments(out, &comment.replies, depth + 1);
    }
}

/// Per-item expansion limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformOptions {
    pub include_comments: bool,
    /// How many leading posts get expanded
    pub max_comment_items: usize,
    /// Top-level comments kept per post
    pub max_comments: usize,
}

impl Default for PlatformOptions {
    fn default() -> Self {
        Self {
            include_comments: true,
            max_comment_items: 5,
            max_comments: 20,
        }
    }
}

impl From<&crate::PlatformsConfig> for PlatformOptions {
    fn from(config: &crate::PlatformsConfig) -> Self {
        Self {
            include_comments: config.include_comments,
            max_comment_items: config.max_comment_items,
            max_comments: config.max_comments,
        }
    }
}

/// How more items are loaded once the first batch is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    Scroll,
    NextPage(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeState {
    Init,
    Navigated,
    AwaitingContent,
    Extracting,
    Paginating,
    Scrolling,
    Done,
    Failed,
}

impl fmt::Display for ScrapeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[async_trait]
pub trait PlatformScraper: Send + Sync {
    fn platform(&self) -> Platform;

    /// Items one "page" of `page_limit` is worth
    fn items_per_page(&self) -> usize;

    /// Where a user signs in with the pre-auth profile
    fn login_url(&self) -> &'static str;

    fn search_url(&self, query: &SearchQuery) -> String;

    /// Matches one result item; its presence means content has loaded
    fn item_selector(&self) -> &'static str;

    /// Marker the site shows when the query has no results
    fn no_results_selector(&self) -> &'static str;

    fn pagination(&self) -> Pagination {
        Pagination::Scroll
    }

    /// Every item currently in the DOM, in page order
    fn parse_posts(&self, html: &str) -> Vec<PlatformPost>;

    /// Fill in full text and comments for `post`, found on the current page
    /// by its link
    async fn expand(
        &self,
        _page: &dyn PageDriver,
        _post: &mut PlatformPost,
        _options: &PlatformOptions,
    ) -> Result<()> {
        Ok(())
    }
}

pub fn scraper_for(platform: Platform) -> Option<Box<dyn PlatformScraper>> {
    match platform {
        Platform::General => None,
        Platform::Shortform => Some(Box::new(XiaohongshuScraper)),
        Platform::Qa => Some(Box::new(ZhihuScraper)),
        Platform::Microblog => Some(Box::new(WeiboScraper)),
        Platform::Linkaggregator => Some(Box::new(RedditScraper)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentState {
    Ready,
    NoResults,
    TimedOut,
}

struct Tracker {
    platform: Platform,
    state: ScrapeState,
}

impl Tracker {
    fn enter(&mut self, next: ScrapeState) {
        debug!(platform = %self.platform, from = %self.state, to = %next, "Platform state");
        self.state = next;
    }
}

/// Run `scraper` for `query` on an open session.
///
/// The caller owns the session and closes it.
pub async fn run_platform(
    scraper: &dyn PlatformScraper,
    session: &mut dyn ScrapeSession,
    query: &SearchQuery,
    options: &PlatformOptions,
) -> Result<PlatformReport> {
    let platform = scraper.platform();
    let cap = query.page_limit() as usize * scraper.items_per_page();
    let mut tracker = Tracker {
        platform,
        state: ScrapeState::Init,
    };

    let url = scraper.search_url(query);
    info!(platform = %platform, url = %url, "Platform search");
    session.navigate(&url).await?;
    tracker.enter(ScrapeState::Navigated);

    let page = session.page()?;
    tracker.enter(ScrapeState::AwaitingContent);
    match await_content(scraper, page).await {
        ContentState::Ready => {}
        ContentState::NoResults => {
            tracker.enter(ScrapeState::Done);
            info!(platform = %platform, "Platform reports no results");
            return Ok(PlatformReport {
                platform,
                query: query.text(),
                posts: Vec::new(),
                no_results: true,
            });
        }
        ContentState::TimedOut => {
            tracker.enter(ScrapeState::Failed);
            return Err(anyhow!(
                "results did not appear after {} polls; sign in with `login {}` and retry",
                CONTENT_POLL_POLICY.max_attempts,
                platform
            ));
        }
    }

    tracker.enter(ScrapeState::Extracting);
    let mut budget = options.max_comment_items;
    let posts = match scraper.pagination() {
        Pagination::Scroll => {
            tracker.enter(ScrapeState::Scrolling);
            let mut posts = scroll_collect(scraper, page, cap).await?;
            posts.truncate(cap);
            expand_posts(scraper, page, &mut posts, options, &mut budget).await;
            posts
        }
        Pagination::NextPage(next) => {
            tracker.enter(ScrapeState::Paginating);
            let pages = PageWalk {
                next,
                page_limit: query.page_limit(),
                cap,
            };
            paginate_collect(scraper, page, pages, options, &mut budget).await?
        }
    };

    if posts.is_empty() {
        tracker.enter(ScrapeState::Failed);
        let rendered = page.count(scraper.item_selector()).await.unwrap_or(0);
        return Err(anyhow!(
            "{rendered} result items rendered but none could be parsed; the page layout may have changed"
        ));
    }

    tracker.enter(ScrapeState::Done);
    info!(platform = %platform, count = posts.len(), "Platform search finished");
    Ok(PlatformReport {
        platform,
        query: query.text(),
        posts,
        no_results: false,
    })
}

/// Expand `posts` in order while `budget` lasts; a failed item is logged
/// and skipped
async fn expand_posts(
    scraper: &dyn PlatformScraper,
    page: &dyn PageDriver,
    posts: &mut [PlatformPost],
    options: &PlatformOptions,
    budget: &mut usize,
) {
    if !options.include_comments {
        return;
    }
    for post in posts.iter_mut() {
        if *budget == 0 {
            break;
        }
        *budget -= 1;
        if let Err(e) = scraper.expand(page, post, options).await {
            warn!(platform = %scraper.platform(), link = %post.link, error = %e, "Item expansion failed");
        }
    }
}

async fn await_content(scraper: &dyn PlatformScraper, page: &dyn PageDriver) -> ContentState {
    let label = scraper.platform().as_str();
    let found = retry_until(CONTENT_POLL_POLICY, label, move |attempt| async move {
        if page.exists(scraper.item_selector()).await? {
            return Ok(Attempt::Ready(ContentState::Ready));
        }
        if attempt >= NO_RESULTS_GRACE_POLLS && page.exists(scraper.no_results_selector()).await? {
            return Ok(Attempt::Ready(ContentState::NoResults));
        }
        if attempt == 1 {
            info!(
                platform = label,
                "Waiting for results; sign in through the browser window if prompted"
            );
        }
        Ok(Attempt::NotYet)
    })
    .await;
    found.unwrap_or(ContentState::TimedOut)
}

/// Ordered posts, unique by link
#[derive(Default)]
struct Collected {
    seen: HashSet<String>,
    posts: Vec<PlatformPost>,
}

impl Collected {
    fn merge(&mut self, batch: Vec<PlatformPost>) {
        for post in batch {
            if self.seen.insert(post.link.clone()) {
                self.posts.push(post);
            }
        }
    }

    fn len(&self) -> usize {
        self.posts.len()
    }
}

async fn scroll_collect(
    scraper: &dyn PlatformScraper,
    page: &dyn PageDriver,
    cap: usize,
) -> Result<Vec<PlatformPost>> {
    let mut collected = Collected::default();
    collected.merge(scraper.parse_posts(&page.html().await?));

    let mut stalled = 0;
    let mut rounds = 0;
    while collected.len() < cap
        && stalled < MAX_STALLED_SCROLLS
        && rounds < SCROLL_POLICY.max_attempts
    {
        page.scroll_to_bottom().await?;
        tokio::time::sleep(SCROLL_POLICY.interval).await;
        rounds += 1;

        let before = collected.len();
        collected.merge(scraper.parse_posts(&page.html().await?));
        if collected.len() > before {
            stalled = 0;
        } else {
            stalled += 1;
        }
        debug!(rounds, stalled, count = collected.len(), "Scroll round");
    }
    Ok(collected.posts)
}

struct PageWalk {
    next: &'static str,
    page_limit: u32,
    cap: usize,
}

/// Collect page by page, expanding each page's new posts before leaving it
async fn paginate_collect(
    scraper: &dyn PlatformScraper,
    page: &dyn PageDriver,
    walk: PageWalk,
    options: &PlatformOptions,
    budget: &mut usize,
) -> Result<Vec<PlatformPost>> {
    let PageWalk {
        next,
        page_limit,
        cap,
    } = walk;
    let mut collected = Collected::default();
    collected.merge(scraper.parse_posts(&page.html().await?));
    let end = collected.len().min(cap);
    expand_posts(scraper, page, &mut collected.posts[..end], options, budget).await;

    for page_number in 2..=page_limit {
        if collected.len() >= cap {
            break;
        }
        let clicked = retry_until(NEXT_PAGE_POLICY, "platform_next_page", move |_| async move {
            Ok(if page.click(next).await? {
                Attempt::Ready(())
            } else {
                Attempt::NotYet
            })
        })
        .await;
        if clicked.is_none() {
            info!(page_number, "No further pages");
            break;
        }

        stabilize::wait_for_stable(page).await;
        if let Err(e) =
            wait_for_selector(page, scraper.item_selector(), PAGE_RENDER_TIMEOUT).await
        {
            warn!(page_number, error = %e, "Next page did not render items");
            break;
        }
        let start = collected.len();
        collected.merge(scraper.parse_posts(&page.html().await?));
        let end = collected.len().min(cap);
        expand_posts(scraper, page, &mut collected.posts[start..end], options, budget).await;
    }
    collected.posts.truncate(cap);
    Ok(collected.posts)
}

/// Position of the node linking to `link` among everything `css` matches.
///
/// Nodes that yield no link still count, so the position lines up with
/// `querySelectorAll(css)` and `click_nth(css, ..)` on the live page.
pub(crate) fn position_of<F>(html: &str, css: &str, link: &str, link_of: F) -> Option<usize>
where
    F: Fn(ElementRef<'_>) -> Option<String>,
{
    let document = Html::parse_document(html);
    let sel = selector(css)?;
    document
        .select(&sel)
        .position(|node| link_of(node).as_deref() == Some(link))
}

/// [`position_of`] against the page as it is now
pub(crate) async fn locate_item<F>(
    page: &dyn PageDriver,
    css: &str,
    link: &str,
    link_of: F,
) -> Result<usize>
where
    F: Fn(ElementRef<'_>) -> Option<String> + Send,
{
    let html = page.html().await?;
    position_of(&html, css, link, link_of).ok_or_else(|| anyhow!("{link} is no longer on the page"))
}

pub(crate) fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Whitespace-collapsed text of the first non-empty match of any selector
pub(crate) fn text_in(root: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|css| {
        let sel = selector(css)?;
        root.select(&sel)
            .map(|node| collapse_whitespace(&node.text().collect::<String>()))
            .find(|text| !text.is_empty())
    })
}

pub(crate) fn attr_in(root: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    root.select(&sel)
        .find_map(|node| node.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Absolute http(s) link for `href` as found on `base`
pub(crate) fn absolute_link(base: &str, href: &str) -> Option<String> {
    let joined = Url::parse(base).ok()?.join(href.trim()).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{Advance, FakePage, FakeSession};

    /// Minimal scraper over `<div class="item"><a href=..>..</a></div>`
    struct ListScraper {
        pagination: Pagination,
    }

    #[async_trait]
    impl PlatformScraper for ListScraper {
        fn platform(&self) -> Platform {
            Platform::Qa
        }
        fn items_per_page(&self) -> usize {
            3
        }
        fn login_url(&self) -> &'static str {
            "https://list.test/login"
        }
        fn search_url(&self, query: &SearchQuery) -> String {
            format!("https://list.test/search?q={}", urlencoding::encode(&query.text()))
        }
        fn item_selector(&self) -> &'static str {
            "div.item"
        }
        fn no_results_selector(&self) -> &'static str {
            "div.empty"
        }
        fn pagination(&self) -> Pagination {
            self.pagination
        }
        fn parse_posts(&self, html: &str) -> Vec<PlatformPost> {
            let document = scraper::Html::parse_document(html);
            let Some(item) = selector("div.item") else {
                return Vec::new();
            };
            document
                .select(&item)
                .filter_map(|node| {
                    let href = attr_in(node, "a", "href")?;
                    let mut post = PlatformPost::new(PostKind::Answer, href);
                    post.content = text_in(node, &["a"]).unwrap_or_default();
                    Some(post)
                })
                .collect()
        }
        async fn expand(
            &self,
            page: &dyn PageDriver,
            post: &mut PlatformPost,
            _options: &PlatformOptions,
        ) -> Result<()> {
            if post.link.ends_with("/1") {
                return Err(anyhow!("detached node"));
            }
            let position = locate_item(page, "div.item", &post.link, |node| attr_in(node, "a", "href")).await?;
            post.comments.push(PlatformComment {
                author: "bot".to_string(),
                content: format!("expanded at {position}"),
                ..PlatformComment::default()
            });
            Ok(())
        }
    }

    fn items(range: std::ops::RangeInclusive<usize>) -> String {
        range
            .map(|n| format!("<div class='item'><a href='https://list.test/{n}'>Item {n}</a></div>"))
            .collect()
    }

    fn query(page_limit: u32) -> SearchQuery {
        SearchQuery::new(["rust"], page_limit, Platform::Qa).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn no_results_marker_short_circuits_after_grace() {
        let page = Arc::new(FakePage::with_html("<div class='empty'>Nothing here</div>"));
        let mut session = FakeSession::new(page.clone());
        let scraper = ListScraper {
            pagination: Pagination::Scroll,
        };
        let start = tokio::time::Instant::now();

        let report = run_platform(&scraper, &mut session, &query(1), &PlatformOptions::default())
            .await
            .unwrap();

        assert!(report.no_results);
        assert!(report.posts.is_empty());
        // detected on the second poll, one interval in
        assert_eq!(start.elapsed(), CONTENT_POLL_POLICY.interval);
        assert!(start.elapsed() <= Duration::from_secs(10));
        assert_eq!(page.gotos(), vec!["https://list.test/search?q=rust".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_content_fails_after_full_ceiling() {
        let page = Arc::new(FakePage::with_html("<div>login wall</div>"));
        let mut session = FakeSession::new(page);
        let scraper = ListScraper {
            pagination: Pagination::Scroll,
        };
        let start = tokio::time::Instant::now();

        let err = run_platform(&scraper, &mut session, &query(1), &PlatformOptions::default())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("did not appear"));
        assert_eq!(start.elapsed(), CONTENT_POLL_POLICY.max_wait());
    }

    #[tokio::test(start_paused = true)]
    async fn scrolling_stops_after_three_stalled_rounds() {
        let page = Arc::new(FakePage::new());
        page.set_stages(vec![items(1..=1), items(1..=2)]);
        page.advance_on(Advance::Scroll);
        let mut session = FakeSession::new(page.clone());
        let scraper = ListScraper {
            pagination: Pagination::Scroll,
        };
        let options = PlatformOptions {
            include_comments: false,
            ..PlatformOptions::default()
        };

        let report = run_platform(&scraper, &mut session, &query(2), &options)
            .await
            .unwrap();

        assert_eq!(report.posts.len(), 2);
        // one productive round, then three without growth
        assert_eq!(page.scroll_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn results_are_capped_and_expansion_failures_are_isolated() {
        let page = Arc::new(FakePage::with_html(items(1..=5)));
        let mut session = FakeSession::new(page.clone());
        let scraper = ListScraper {
            pagination: Pagination::Scroll,
        };

        let report = run_platform(&scraper, &mut session, &query(1), &PlatformOptions::default())
            .await
            .unwrap();

        assert_eq!(report.posts.len(), 3);
        assert_eq!(page.scroll_count(), 0);
        assert!(report.posts[0].comments.is_empty());
        assert_eq!(report.posts[1].comments[0].content, "expanded at 1");
        assert_eq!(report.posts[2].comments[0].content, "expanded at 2");
    }

    #[tokio::test(start_paused = true)]
    async fn expansion_finds_items_by_link_past_unparseable_nodes() {
        let html = format!("<div class='item'>sponsored</div>{}", items(2..=3));
        let page = Arc::new(FakePage::with_html(html));
        let mut session = FakeSession::new(page);
        let scraper = ListScraper {
            pagination: Pagination::Scroll,
        };

        let report = run_platform(&scraper, &mut session, &query(1), &PlatformOptions::default())
            .await
            .unwrap();

        assert_eq!(report.posts[0].link, "https://list.test/2");
        assert_eq!(report.posts[0].comments[0].content, "expanded at 1");
        assert_eq!(report.posts[1].comments[0].content, "expanded at 2");
    }

    #[tokio::test(start_paused = true)]
    async fn each_page_is_expanded_before_moving_on() {
        let page = Arc::new(FakePage::new());
        page.set_stages(vec![
            format!("{}<a class='next' href='?page=2'>next</a>", items(2..=3)),
            items(4..=5),
        ]);
        page.advance_on(Advance::Click);
        let mut session = FakeSession::new(page);
        let scraper = ListScraper {
            pagination: Pagination::NextPage("a.next"),
        };
        let options = PlatformOptions {
            max_comment_items: 3,
            ..PlatformOptions::default()
        };

        let report = run_platform(&scraper, &mut session, &query(2), &options)
            .await
            .unwrap();

        let expanded: Vec<_> = report
            .posts
            .iter()
            .map(|p| p.comments.first().map(|c| c.content.as_str()))
            .collect();
        assert_eq!(
            expanded,
            [Some("expanded at 0"), Some("expanded at 1"), Some("expanded at 0"), None]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rendered_but_unparseable_items_are_an_error() {
        let page = Arc::new(FakePage::with_html(
            "<div class='item'>promo</div><div class='item'>promo</div>",
        ));
        let mut session = FakeSession::new(page);
        let scraper = ListScraper {
            pagination: Pagination::Scroll,
        };
        let options = PlatformOptions {
            include_comments: false,
            ..PlatformOptions::default()
        };

        let err = run_platform(&scraper, &mut session, &query(1), &options)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("2 result items rendered"), "{err}");
    }

    #[test]
    fn positions_count_nodes_without_links() {
        let html = format!("<div class='item'>ad</div>{}", items(1..=2));
        let link_of = |node: ElementRef<'_>| attr_in(node, "a", "href");

        assert_eq!(position_of(&html, "div.item", "https://list.test/2", link_of), Some(2));
        assert_eq!(position_of(&html, "div.item", "https://list.test/9", link_of), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pagination_follows_next_control() {
        let page = Arc::new(FakePage::new());
        page.set_stages(vec![
            format!("{}<a class='next' href='?page=2'>next</a>", items(1..=3)),
            items(4..=5),
        ]);
        page.advance_on(Advance::Click);
        let mut session = FakeSession::new(page.clone());
        let scraper = ListScraper {
            pagination: Pagination::NextPage("a.next"),
        };
        let options = PlatformOptions {
            include_comments: false,
            ..PlatformOptions::default()
        };

        let report = run_platform(&scraper, &mut session, &query(3), &options)
            .await
            .unwrap();

        let links: Vec<_> = report.posts.iter().map(|p| p.link.as_str()).collect();
        assert_eq!(
            links,
            [
                "https://list.test/1",
                "https://list.test/2",
                "https://list.test/3",
                "https://list.test/4",
                "https://list.test/5"
            ]
        );
        assert_eq!(page.clicks(), vec![("a.next".to_string(), 0)]);
    }

    #[test]
    fn markdown_lists_posts_and_nested_comments() {
        let mut post = PlatformPost::new(PostKind::Post, "https://example.test/p/1");
        post.title = Some("Error handling in Go".to_string());
        post.author = "gopher".to_string();
        post.engagement.insert("score".to_string(), "42".to_string());
        post.comments.push(PlatformComment {
            author: "a".to_string(),
            content: "use errors.Is".to_string(),
            replies: vec![PlatformComment {
                author: "b".to_string(),
                content: "and errors.As".to_string(),
                ..PlatformComment::default()
            }],
            ..PlatformComment::default()
        });
        let report = PlatformReport {
            platform: Platform::Linkaggregator,
            query: "golang errors".to_string(),
            posts: vec![post],
            no_results: false,
        };

        let md = report.render_markdown();
        assert!(md.contains("### 1. [Error handling in Go](https://example.test/p/1)"));
        assert!(md.contains("by gopher"));
        assert!(md.contains("score: 42"));
        assert!(md.contains("- **a**: use errors.Is\n  - **b**: and errors.As"));
        assert_eq!(report.posts[0].comments[0].total(), 2);
    }

    #[test]
    fn every_platform_except_general_has_a_scraper() {
        assert!(scraper_for(Platform::General).is_none());
        for platform in Platform::ALL.into_iter().skip(1) {
            let scraper = scraper_for(platform).unwrap();
            assert_eq!(scraper.platform(), platform);
            assert!(scraper.login_url().starts_with("https://"));
        }
    }
}
