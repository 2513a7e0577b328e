use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    CardLayout, EngineConfig, RawResult, SearchEngine, click_first, default_headers, parse_cards,
    submit_search_form, url_contains,
};
use crate::browser::PageDriver;

const SEARCH_INPUTS: &[&str] = &["textarea[name='q']", "input[name='q']"];
const NEXT_PAGE: &[&str] = &["#pnnext", "a[aria-label='Next page']"];

const LAYOUT: CardLayout<'static> = CardLayout {
    cards: &["#search div.g", "div.tF2Cxc", "div.g"],
    title: &["h3"],
    link: &["a[jsname]", "a:has(h3)", "a"],
    snippet: &["div.VwiC3b", "span.aCOpRe", "div[data-sncf]"],
    url_attr: None,
};

pub struct GoogleEngine {
    config: EngineConfig,
}

impl GoogleEngine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "google",
                homepage_url: "https://www.google.com/",
                cookie_domain: Some(".google.com"),
                custom_headers: default_headers("en-US,en;q=0.9"),
                wait_after_submit: Duration::from_secs(2),
                wait_after_click: Duration::from_secs(2),
            },
        }
    }
}

impl Default for GoogleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for GoogleEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn submit(&self, page: &dyn PageDriver, query: &str) -> Result<bool> {
        submit_search_form(page, SEARCH_INPUTS, query).await
    }

    async fn validate(&self, page: &dyn PageDriver) -> Result<bool> {
        let url = page.current_url().await?;
        // captcha interstitial
        if url_contains(&url, &["/sorry/"]) {
            return Ok(false);
        }
        Ok(url_contains(&url, &["/search"]) && page.exists("#search").await?)
    }

    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<RawResult>> {
        let html = page.html().await?;
        Ok(parse_cards(&html, self.config.homepage_url, &LAYOUT))
    }

    async fn next_page(&self, page: &dyn PageDriver) -> Result<bool> {
        click_first(page, NEXT_PAGE).await
    }
}
