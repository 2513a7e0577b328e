use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    CardLayout, EngineConfig, RawResult, SearchEngine, click_first, default_headers, parse_cards,
    submit_search_form, url_contains,
};
use crate::browser::PageDriver;

const SEARCH_INPUTS: &[&str] = &["#sb_form_q", "textarea[name='q']", "input[name='q']"];
const NEXT_PAGE: &[&str] = &["a.sb_pagN", "a[title='Next page']", "a[aria-label='Next page']"];

const LAYOUT: CardLayout<'static> = CardLayout {
    cards: &["#b_results > li.b_algo", "li.b_algo"],
    title: &["h2 a", "h2"],
    link: &["h2 a", "a.tilk", "a"],
    snippet: &[".b_caption p", "p.b_lineclamp2", "p.b_lineclamp3", "p"],
    url_attr: None,
};

pub struct BingEngine {
    config: EngineConfig,
}

impl BingEngine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "bing",
                homepage_url: "https://www.bing.com/",
                cookie_domain: Some(".bing.com"),
                custom_headers: default_headers("en-US,en;q=0.9"),
                wait_after_submit: Duration::from_secs(2),
                wait_after_click: Duration::from_secs(2),
            },
        }
    }
}

impl Default for BingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for BingEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn submit(&self, page: &dyn PageDriver, query: &str) -> Result<bool> {
        submit_search_form(page, SEARCH_INPUTS, query).await
    }

    async fn validate(&self, page: &dyn PageDriver) -> Result<bool> {
        let url = page.current_url().await?;
        if !url_contains(&url, &["/search"]) {
            return Ok(false);
        }
        page.exists("#b_results").await
    }

    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<RawResult>> {
        let html = page.html().await?;
        Ok(parse_cards(&html, self.config.homepage_url, &LAYOUT))
    }

    async fn next_page(&self, page: &dyn PageDriver) -> Result<bool> {
        click_first(page, NEXT_PAGE).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    const FIXTURE: &str = r#"
        <html><body><ol id="b_results">
          <li class="b_algo">
            <h2><a href="https://www.rust-lang.org/learn">Learn Rust</a></h2>
            <div class="b_caption"><p>Get started   with Rust.</p></div>
          </li>
          <li class="b_algo">
            <h2><a href="https://doc.rust-lang.org/book/">The Rust Book</a></h2>
            <div class="b_caption"><p>An introductory book.</p></div>
          </li>
          <li class="b_ad"><h2><a href="https://ads.example/">Ad</a></h2></li>
          <li class="b_algo"><h2>No link here</h2></li>
        </ol><a class="sb_pagN" href="/search?q=rust&first=11">Next</a></body></html>
    "#;

    #[tokio::test]
    async fn extracts_organic_results_only() {
        let page = FakePage::with_html(FIXTURE);
        let results = BingEngine::new().extract(&page).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Learn Rust");
        assert_eq!(results[0].url, "https://www.rust-lang.org/learn");
        assert_eq!(results[0].description, "Get started with Rust.");
    }

    #[tokio::test]
    async fn validate_requires_results_page() {
        let engine = BingEngine::new();
        let page = FakePage::with_html(FIXTURE);
        page.set_url("https://www.bing.com/");
        assert!(!engine.validate(&page).await.unwrap());

        page.set_url("https://www.bing.com/search?q=rust");
        assert!(engine.validate(&page).await.unwrap());
    }

    #[tokio::test]
    async fn next_page_clicks_pager() {
        let page = FakePage::with_html(FIXTURE);
        assert!(BingEngine::new().next_page(&page).await.unwrap());
        assert_eq!(page.clicks(), vec![("a.sb_pagN".to_string(), 0)]);
    }
}
