//! DOM automation seam used by the engine and platform scrapers
//!
//! `PageDriver` is implemented for `chromiumoxide::Page`; tests implement it
//! with scripted fakes.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide_cdp::cdp::browser_protocol::network::{
    DeleteCookiesParams, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide_cdp::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide_cdp::cdp::js_protocol::runtime::{CallArgument, CallFunctionOnParams};
use serde_json::{Value, json};

use super::BrowserResult;

/// Encoding requested from the screenshot endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Webp,
    Png,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Webp => "image/webp",
            ImageFormat::Png => "image/png",
        }
    }
}

impl From<ImageFormat> for CaptureScreenshotFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Webp => CaptureScreenshotFormat::Webp,
            ImageFormat::Png => CaptureScreenshotFormat::Png,
        }
    }
}

/// Page-level operations the scrapers are written against.
///
/// Element-targeting methods return `Ok(false)` when the selector matches
/// nothing so callers can retry without treating a missing node as fatal.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Rendered HTML of the whole document
    async fn html(&self) -> Result<String>;

    /// Length of the rendered HTML, polled by the stabilization wait
    async fn html_length(&self) -> Result<usize> {
        Ok(self.html().await?.len())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value>;

    async fn count(&self, selector: &str) -> Result<usize>;

    async fn exists(&self, selector: &str) -> Result<bool> {
        Ok(self.count(selector).await? > 0)
    }

    async fn click(&self, selector: &str) -> Result<bool> {
        self.click_nth(selector, 0).await
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<bool>;

    async fn scroll_nth_into_view(&self, selector: &str, index: usize) -> Result<bool>;

    /// Focus the element, clear it and type `text`
    async fn type_text(&self, selector: &str, text: &str) -> Result<bool>;

    async fn press_key(&self, selector: &str, key: &str) -> Result<bool>;

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()>;

    async fn scroll_to_bottom(&self) -> Result<()>;

    async fn screenshot(&self, format: ImageFormat) -> Result<Vec<u8>>;

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;

    /// Delete every cookie whose domain ends with `domain`, returning how many
    async fn clear_cookies(&self, domain: &str) -> Result<usize>;
}

/// One browser session as seen by a scraper
#[async_trait]
pub trait ScrapeSession: Send {
    /// Make sure a page exists (blank if nothing was opened yet) so headers
    /// and cookies can be set before the first navigation
    async fn open_blank(&mut self) -> BrowserResult<()>;

    /// Navigate (reusing a same-domain page when possible) and wait for the
    /// page to stabilize
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    fn page(&self) -> BrowserResult<&dyn PageDriver>;

    async fn close(&mut self) -> BrowserResult<()>;
}

/// Creates one fresh session per search invocation
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, headless: bool) -> BrowserResult<Box<dyn ScrapeSession>>;
}

#[async_trait]
impl PageDriver for Page {
    async fn goto(&self, url: &str) -> Result<()> {
        Page::goto(self, url)
            .await
            .with_context(|| format!("Failed to navigate to {url}"))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self
            .url()
            .await
            .context("Failed to read page URL")?
            .unwrap_or_default())
    }

    async fn html(&self) -> Result<String> {
        self.content().await.context("Failed to read page content")
    }

    async fn html_length(&self) -> Result<usize> {
        let value = PageDriver::evaluate(
            self,
            "document.documentElement ? document.documentElement.outerHTML.length : 0",
        )
        .await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = Page::evaluate(self, expression)
            .await
            .context("JavaScript evaluation failed")?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        match self.find_elements(selector).await {
            Ok(elements) => Ok(elements.len()),
            Err(_) => Ok(0),
        }
    }

    async fn click_nth(&self, selector: &str, index: usize) -> Result<bool> {
        let elements = match self.find_elements(selector).await {
            Ok(elements) => elements,
            Err(_) => return Ok(false),
        };
        let Some(element) = elements.get(index) else {
            return Ok(false);
        };
        element
            .scroll_into_view()
            .await
            .with_context(|| format!("Failed to scroll '{selector}' into view"))?;
        element
            .click()
            .await
            .with_context(|| format!("Click failed for '{selector}'"))?;
        Ok(true)
    }

    async fn scroll_nth_into_view(&self, selector: &str, index: usize) -> Result<bool> {
        let elements = match self.find_elements(selector).await {
            Ok(elements) => elements,
            Err(_) => return Ok(false),
        };
        match elements.get(index) {
            Some(element) => {
                element
                    .scroll_into_view()
                    .await
                    .with_context(|| format!("Failed to scroll '{selector}' into view"))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<bool> {
        let element = match self.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .scroll_into_view()
            .await
            .with_context(|| format!("Failed to scroll '{selector}' into view"))?;
        element
            .click()
            .await
            .with_context(|| format!("Failed to focus '{selector}'"))?;
        element
            .call_js_fn("function() { this.value = ''; }", false)
            .await
            .with_context(|| format!("Failed to clear '{selector}'"))?;
        element
            .type_str(text)
            .await
            .with_context(|| format!("Typing into '{selector}' failed"))?;
        Ok(true)
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<bool> {
        let element = match self.find_element(selector).await {
            Ok(element) => element,
            Err(_) => return Ok(false),
        };
        element
            .press_key(key)
            .await
            .with_context(|| format!("Key press '{key}' failed on '{selector}'"))?;
        Ok(true)
    }

    async fn scroll_by(&self, dx: i64, dy: i64) -> Result<()> {
        // Parameterized call, the deltas never get spliced into source text
        let call = CallFunctionOnParams::builder()
            .function_declaration("(x, y) => window.scrollBy(x, y)")
            .argument(CallArgument::builder().value(json!(dx)).build())
            .argument(CallArgument::builder().value(json!(dy)).build())
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build scroll params: {e}"))?;
        self.evaluate_function(call)
            .await
            .context("Scroll by amount failed")?;
        Ok(())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        PageDriver::evaluate(
            self,
            "window.scrollTo(0, document.body ? document.body.scrollHeight : 0)",
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&self, format: ImageFormat) -> Result<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::from(format))
            .build();
        Page::screenshot(self, params)
            .await
            .context("Page screenshot failed")
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        if headers.is_empty() {
            return Ok(());
        }
        self.execute(SetExtraHttpHeadersParams::new(Headers::new(json!(headers))))
            .await
            .context("Failed to set extra HTTP headers")?;
        Ok(())
    }

    async fn clear_cookies(&self, domain: &str) -> Result<usize> {
        let cookies = self.get_cookies().await.context("Failed to read cookies")?;
        let bare = domain.trim_start_matches('.');
        let mut removed = 0;
        for cookie in cookies
            .into_iter()
            .filter(|c| c.domain.trim_start_matches('.').ends_with(bare))
        {
            let params = DeleteCookiesParams::builder()
                .name(cookie.name.clone())
                .domain(cookie.domain.clone())
                .build()
                .map_err(|e| anyhow::anyhow!("Failed to build cookie deletion: {e}"))?;
            self.execute(params)
                .await
                .with_context(|| format!("Failed to delete cookie {}", cookie.name))?;
            removed += 1;
        }
        Ok(removed)
    }
}
