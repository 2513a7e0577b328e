use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{
    CardLayout, EngineConfig, RawResult, SearchEngine, default_headers, parse_cards,
    submit_search_form, url_contains,
};
use crate::browser::PageDriver;

const SEARCH_INPUTS: &[&str] = &["#kw", "input[name='wd']"];
const PAGER_LINKS: &str = "#page a.n";

/// Organic cards carry the landing url in `mu`; the anchor is a redirect
const LAYOUT: CardLayout<'static> = CardLayout {
    cards: &["#content_left div.c-container[mu]", "div.result.c-container"],
    title: &["h3 a", "h3"],
    link: &["h3 a"],
    snippet: &[
        "span.content-right_8Zs40",
        "div.c-abstract",
        "span[class*='content-right']",
        "div[class*='abstract']",
    ],
    url_attr: Some("mu"),
};

pub struct BaiduEngine {
    config: EngineConfig,
}

impl BaiduEngine {
    pub fn new() -> Self {
        Self {
            config: EngineConfig {
                name: "baidu",
                homepage_url: "https://www.baidu.com/",
                cookie_domain: Some(".baidu.com"),
                custom_headers: default_headers("zh-CN,zh;q=0.9,en;q=0.8"),
                wait_after_submit: Duration::from_secs(2),
                wait_after_click: Duration::from_secs(2),
            },
        }
    }
}

impl Default for BaiduEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for BaiduEngine {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn submit(&self, page: &dyn PageDriver, query: &str) -> Result<bool> {
        submit_search_form(page, SEARCH_INPUTS, query).await
    }

    async fn validate(&self, page: &dyn PageDriver) -> Result<bool> {
        let url = page.current_url().await?;
        if url_contains(&url, &["wappass.baidu.com", "/captcha"]) {
            return Ok(false);
        }
        Ok(url_contains(&url, &["/s?", "wd="]) && page.exists("#content_left").await?)
    }

    async fn extract(&self, page: &dyn PageDriver) -> Result<Vec<RawResult>> {
        let html = page.html().await?;
        Ok(parse_cards(&html, self.config.homepage_url, &LAYOUT))
    }

    /// Previous and next share `a.n`; next is always the last one
    async fn next_page(&self, page: &dyn PageDriver) -> Result<bool> {
        let count = page.count(PAGER_LINKS).await?;
        if count == 0 {
            return Ok(false);
        }
        page.click_nth(PAGER_LINKS, count - 1).await
    }
}
