use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    CardLayout, EngineConfig, RawResult, SearchEngine, click_first, default_headers, parse_cards,
    submit_search_form, url_contains,
};
use crate::browser::PageDriver;

const SEARCH_INPUTS: &[&str] = &["#searchbox_input", "input[name='q']"];
const NEXT_PAGE: &[&str] = &["#more-results", "button#more-results", "input.btn--alt"];

const LAYOUT: CardLayout<'static> = CardLayout {
    cards: &["article[data-testid='result']", "div.result"],
    title: &["h2 a span", "h2 a", "a.result__a"],
    link: &["a[data-testid='result-title-a']", "h2 a", "a.result__a"],
    snippet: &[
        "div[data-result='snippet']",
        "[data-testid='result-snippet']",
        ".result__snippet",
    ],
    url_attr: None,
};

pub struct DuckDuckGoEngine {
    config: EngineConfig,
}

impl DuckDuckGoEngine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "duckduckgo",
                homepage_url: "https://duckduckgo.com/",
                cookie_domain: None,
                custom_headers: default_headers("en-US,en;q=0.9"),
                wait_after_submit: Duration::from_secs(2),
                wait_after_click: Duration::from_millis(1500),
            },
        }
    }
}

impl Default for DuckDuckGoEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn submit(&self, page: &dyn PageDriver, query: &str) -> Result<bool> {
        submit_search_form(page, SEARCH_INPUTS, query).await
    }

    async fn validate(&self, page: &dyn PageDriver) -> Result<bool> {
        let url = page.current_url().await?;
        Ok(url_contains(&url, &["?q=", "&q="]))
    }

    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<RawResult>> {
        let html = page.html().await?;
        Ok(parse_cards(&html, self.config.homepage_url, &LAYOUT))
    }

    /// Results page appends more cards instead of paging
    async fn next_page(&self, page: &dyn PageDriver) -> Result<bool> {
        click_first(page, NEXT_PAGE).await
    }
}
