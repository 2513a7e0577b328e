//! Long-form page fetching
//!
//! Turns an arbitrary URL into markdown using an already-launched session.
//! Link-aggregator thread URLs get a dedicated extractor that keeps the
//! comment tree; everything else goes through `html2md` on the page's main
//! content region.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;
use tracing::{debug, info};
use url::Url;

use crate::browser::ScrapeSession;
use crate::platforms::reddit::parse_thread;
use crate::platforms::{PlatformPost, PlatformReport, selector};
use crate::registry::FileRegistry;
use crate::utils::SearchError;
use crate::utils::retry::{Attempt, EXPAND_POLICY, retry_until};
use crate::web_search::types::Platform;

static NOISE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<svg\b.*?</svg>")
        .expect("noise pattern is a valid regex")
});

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank-run pattern is a valid regex"));

/// Regions tried in order for the readable body
const MAIN_REGIONS: &[&str] = &["article", "main", "[role='main']", "body"];

#[derive(Debug, Clone)]
pub struct ContentFetcher {
    max_comments: usize,
}

impl Default for ContentFetcher {
    fn default() -> Self {
        Self { max_comments: 50 }
    }
}

impl ContentFetcher {
    pub fn new(max_comments: usize) -> Self {
        Self { max_comments }
    }

    /// Navigate `session` to `url` and return the page as markdown.
    ///
    /// The caller owns the session and closes it.
    pub async fn fetch_content(
        &self,
        session: &mut dyn ScrapeSession,
        url: &str,
    ) -> Result<String, SearchError> {
        let parsed = Url::parse(url)
            .map_err(|e| SearchError::InvalidQuery(format!("invalid url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SearchError::InvalidQuery(format!(
                "unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        session.navigate(url).await?;
        let page = session.page()?;

        if is_thread_url(&parsed) {
            let html = retry_until(EXPAND_POLICY, "thread_comments", move |_| async move {
                let html = page.html().await?;
                Ok(if html.contains("<shreddit-comment") {
                    Attempt::Ready(html)
                } else {
                    Attempt::NotYet
                })
            })
            .await;
            let html = match html {
                Some(html) => html,
                None => page.html().await?,
            };
            if let Some(post) = parse_thread(&html, self.max_comments) {
                info!(url = %url, comments = post.comments.len(), "Fetched thread");
                return Ok(thread_markdown(post));
            }
            debug!(url = %url, "Thread layout not recognized, using generic extraction");
        }

        let html = page.html().await?;
        let markdown = page_markdown(&html, url);
        info!(url = %url, chars = markdown.chars().count(), "Fetched page");
        Ok(markdown)
    }

    /// Fetch `url` into a markdown file under `dir` and register it.
    ///
    /// Returns the registry id and the written path.
    pub async fn fetch_to_file(
        &self,
        session: &mut dyn ScrapeSession,
        url: &str,
        dir: &Path,
        registry: &FileRegistry,
    ) -> Result<(String, PathBuf), SearchError> {
        let markdown = self.fetch_content(session, url).await?;
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(file_name_for(url));
        tokio::fs::write(&path, markdown).await?;
        let id = registry.insert(&path);
        info!(id = %id, path = %path.display(), "Saved fetched page");
        Ok((id, path))
    }
}

/// Comment thread on the link-aggregator platform
fn is_thread_url(url: &Url) -> bool {
    let on_platform = url
        .host_str()
        .is_some_and(|host| host == "reddit.com" || host.ends_with(".reddit.com"));
    on_platform && url.path().contains("/comments/")
}

fn thread_markdown(post: PlatformPost) -> String {
    let report = PlatformReport {
        platform: Platform::Linkaggregator,
        query: post.title.clone().unwrap_or_else(|| post.link.clone()),
        posts: vec![post],
        no_results: false,
    };
    report.render_markdown()
}

/// Markdown for the main region of `html`, headed by the page title
pub fn page_markdown(html: &str, url: &str) -> String {
    let cleaned = NOISE.replace_all(html, "").into_owned();
    let document = Html::parse_document(&cleaned);

    let title = selector("title")
        .and_then(|sel| document.select(&sel).next())
        .map(|node| node.text().collect::<String>().trim().to_string())
        .filter(|title| !title.is_empty());

    let region = MAIN_REGIONS
        .iter()
        .filter_map(|css| selector(css))
        .find_map(|sel| document.select(&sel).next())
        .map(|node| node.inner_html())
        .unwrap_or_else(|| cleaned.clone());

    let body = html2md::parse_html(&region);
    let body = BLANK_RUNS.replace_all(body.trim(), "\n\n").into_owned();

    let mut out = String::new();
    if let Some(title) = title {
        out.push_str(&format!("# {title}\n\n"));
    }
    out.push_str(&format!("Source: {url}\n\n"));
    out.push_str(&body);
    out.push('\n');
    out
}

/// `<host>-<uuid8>.md`, filesystem-safe
fn file_name_for(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "page".to_string());
    let safe: String = host
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{safe}-{}.md", &suffix[..8])
}
