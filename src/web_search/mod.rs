//! Multi-engine web search and platform dispatch
//!
//! # Architecture
//! - `types` - Query, result and outcome types
//! - `engines` - Per-engine configuration and DOM operations
//! - `scraper` - Drives one engine across result pages
//! - `orchestrator` - Ordered engine fallback and platform dispatch
//!
//! # Usage Patterns
//!
//! ## Standalone Scripts
//! ```no_run
//! use kodegen_tools_websearch::web_search::{self, Platform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let outcome = web_search::search(["rust", "async"], 1, Platform::General).await?;
//!     println!("{}", outcome.render_markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Managed Lifecycle
//! ```no_run
//! use std::sync::Arc;
//! use kodegen_tools_websearch::BrowserManager;
//! use kodegen_tools_websearch::web_search::{Platform, SearchQuery, search_with_manager};
//!
//! async fn run(manager: Arc<BrowserManager>) -> anyhow::Result<()> {
//!     let query = SearchQuery::new(["r/rust", "tokio"], 1, Platform::Linkaggregator)?;
//!     let outcome = search_with_manager(manager, &query).await?;
//!     println!("{} results", outcome.to_search_results().len());
//!     Ok(())
//! }
//! ```

pub mod engines;
mod orchestrator;
mod scraper;
pub mod types;

pub use engines::{EngineConfig, RawResult, SearchEngine};
pub use orchestrator::{EngineFactory, SearchOrchestrator};
pub use scraper::GenericSearchScraper;
pub use types::{
    Platform, SearchOutcome, SearchQuery, SearchResult, dedup_by_url, escape_query,
};

use std::sync::Arc;

use tracing::info;

use crate::BrowserManager;
use crate::platforms::PlatformOptions;
use crate::utils::SearchError;

/// Run `query` with sessions from `manager`, honoring its configuration
pub async fn search_with_manager(
    manager: Arc<BrowserManager>,
    query: &SearchQuery,
) -> Result<SearchOutcome, SearchError> {
    let config = manager.config().clone();
    info!(
        platform = %query.platform(),
        keywords = ?query.keywords(),
        page_limit = query.page_limit(),
        "Starting search"
    );

    let orchestrator = SearchOrchestrator::new(manager, config.search.engine_priority)?
        .headless(config.search.headless)
        .with_platform_options(PlatformOptions::from(&config.platforms));
    orchestrator.search(query).await
}

/// Validate and run a search on the process-wide [`BrowserManager`]
pub async fn search<I, S>(
    keywords: I,
    page_limit: u32,
    platform: Platform,
) -> Result<SearchOutcome, SearchError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let query = SearchQuery::new(keywords, page_limit, platform)?;
    search_with_manager(BrowserManager::global(), &query).await
}
