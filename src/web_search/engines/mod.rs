//! General-purpose search engines
//!
//! Each engine pairs an immutable [`EngineConfig`] with four typed operations
//! written against the [`PageDriver`] DOM API. Result pages are parsed with
//! `scraper` from the rendered HTML.

mod baidu;
mod bing;
mod duckduckgo;
mod google;

pub use baidu::BaiduEngine;
pub use bing::BingEngine;
pub use duckduckgo::DuckDuckGoEngine;
pub use google::GoogleEngine;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use super::types::escape_query;
use crate::browser::PageDriver;

/// Default engine order for general queries
pub const DEFAULT_ENGINE_PRIORITY: [&str; 4] = ["bing", "duckduckgo", "google", "baidu"];

/// Declarative description of one engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub name: &'static str,
    pub homepage_url: &'static str,
    /// Cookies under this domain are cleared before each run
    pub cookie_domain: Option<&'static str>,
    pub custom_headers: BTreeMap<String, String>,
    pub wait_after_submit: Duration,
    pub wait_after_click: Duration,
}

/// Result fields as scraped, before URL normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn config(&self) -> &EngineConfig;

    /// Type `query` into the search box and submit; `false` means "not yet"
    async fn submit(&self, page: &dyn PageDriver, query: &str) -> Result<bool>;

    /// Whether the page is a results page (not a captcha or the homepage)
    async fn validate(&self, page: &dyn PageDriver) -> Result<bool>;

    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<RawResult>>;

    /// Click through to the next results page
    async fn next_page(&self, page: &dyn PageDriver) -> Result<bool>;
}

pub fn engine_by_name(name: &str) -> Option<Box<dyn SearchEngine>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "bing" => Some(Box::new(BingEngine::new())),
        "duckduckgo" | "ddg" => Some(Box::new(DuckDuckGoEngine::new())),
        "google" => Some(Box::new(GoogleEngine::new())),
        "baidu" => Some(Box::new(BaiduEngine::new())),
        _ => None,
    }
}

fn default_headers(accept_language: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(
        "Accept-Language".to_string(),
        accept_language.to_string(),
    )])
}

/// Fill the first matching search box and press Enter.
///
/// When no box accepts typed input, the value is set by script and the form
/// submitted directly; the query is escaped for the string literal.
async fn submit_search_form(page: &dyn PageDriver, inputs: &[&str], query: &str) -> Result<bool> {
    for selector in inputs {
        if page.type_text(selector, query).await? {
            return page.press_key(selector, "Enter").await;
        }
    }

    for selector in inputs {
        let script = format!(
            "(() => {{ const el = document.querySelector('{}'); \
             if (!el) return false; el.value = '{}'; \
             if (el.form) {{ el.form.submit(); return true; }} return false; }})()",
            escape_query(selector),
            escape_query(query)
        );
        if page.evaluate(&script).await? == Value::Bool(true) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Click the first selector that matches anything
async fn click_first(page: &dyn PageDriver, selectors: &[&str]) -> Result<bool> {
    for selector in selectors {
        if page.click(selector).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn url_contains(url: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| url.contains(needle))
}

/// Selectors describing one engine's result cards
struct CardLayout<'a> {
    cards: &'a [&'a str],
    title: &'a [&'a str],
    link: &'a [&'a str],
    snippet: &'a [&'a str],
    /// Attribute on the card holding the real target, when links are redirects
    url_attr: Option<&'a str>,
}

fn parse_cards(html: &str, base: &str, layout: &CardLayout<'_>) -> Vec<RawResult> {
    let document = Html::parse_document(html);
    let mut results = Vec::new();

    for card_selector in layout.cards {
        let Ok(selector) = Selector::parse(card_selector) else {
            continue;
        };
        for card in document.select(&selector) {
            let Some(title) = first_text_in(card, layout.title) else {
                continue;
            };
            let href = layout
                .url_attr
                .and_then(|attr| card.value().attr(attr))
                .map(str::to_string)
                .or_else(|| first_href_in(card, layout.link));
            let Some(url) = href.and_then(|h| normalize_result_url(&h, base)) else {
                continue;
            };
            results.push(RawResult {
                title,
                url,
                description: first_text_in(card, layout.snippet).unwrap_or_default(),
            });
        }
        if !results.is_empty() {
            break;
        }
    }
    results
}

fn first_text_in(root: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        root.select(&selector)
            .map(|node| collapse_whitespace(&node.text().collect::<String>()))
            .find(|text| !text.is_empty())
    })
}

fn first_href_in(root: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        let selector = Selector::parse(sel).ok()?;
        root.select(&selector)
            .filter_map(|node| node.value().attr("href"))
            .find(|href| !href.starts_with('#') && !href.starts_with("javascript:"))
            .map(str::to_string)
    })
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `href` against `base`, unwrap known redirect wrappers and keep
/// only http(s) targets.
pub fn normalize_result_url(href: &str, base: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    let resolved = base.join(href.trim()).ok()?;
    let unwrapped = unwrap_redirect(&resolved).unwrap_or(resolved);
    matches!(unwrapped.scheme(), "http" | "https").then(|| unwrapped.to_string())
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Target of a DuckDuckGo `/l/?uddg=`, Google `/url?q=` or Bing `/ck/a?u=a1`
/// redirect link
pub fn unwrap_redirect(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    let target = if host.ends_with("duckduckgo.com") && url.path().starts_with("/l/") {
        query_param(url, "uddg")?
    } else if host.contains("google.") && url.path() == "/url" {
        query_param(url, "q").or_else(|| query_param(url, "url"))?
    } else if host.ends_with("bing.com") && url.path() == "/ck/a" {
        let encoded = query_param(url, "u")?;
        let payload = encoded.strip_prefix("a1")?;
        String::from_utf8(URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?).ok()?
    } else {
        return None;
    };
    Url::parse(&target).ok()
}
