//! Screenshot capture as a base64 data URL

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::{debug, warn};

use super::{BrowserError, BrowserResult, ImageFormat, PageDriver};

/// Capture the viewport, preferring webp.
///
/// An empty or failed webp capture is retried as png exactly once.
pub async fn capture_data_url(page: &dyn PageDriver) -> BrowserResult<String> {
    match page.screenshot(ImageFormat::Webp).await {
        Ok(bytes) if !bytes.is_empty() => return Ok(to_data_url(ImageFormat::Webp, &bytes)),
        Ok(_) => debug!("webp capture returned no data, retrying as png"),
        Err(e) => warn!(error = %e, "webp capture failed, retrying as png"),
    }

    let bytes = page
        .screenshot(ImageFormat::Png)
        .await
        .map_err(|e| BrowserError::ScreenshotFailed(e.to_string()))?;
    if bytes.is_empty() {
        return Err(BrowserError::ScreenshotFailed(
            "both webp and png captures were empty".to_string(),
        ));
    }
    Ok(to_data_url(ImageFormat::Png, &bytes))
}

pub fn to_data_url(format: ImageFormat, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", format.mime(), STANDARD.encode(bytes))
}
