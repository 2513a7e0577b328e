//! Drives one [`SearchEngine`] end-to-end over a fresh browser session

use tracing::{debug, info, warn};

use super::engines::{RawResult, SearchEngine};
use super::types::{SearchQuery, SearchResult, dedup_by_url};
use crate::browser::{ScrapeSession, SessionFactory};
use crate::utils::SearchError;
use crate::utils::retry::{
    Attempt, EXTRACT_POLICY, NEXT_PAGE_POLICY, SUBMIT_POLICY, retry_until,
};

pub struct GenericSearchScraper<'a> {
    engine: &'a dyn SearchEngine,
}

impl<'a> GenericSearchScraper<'a> {
    pub fn new(engine: &'a dyn SearchEngine) -> Self {
        Self { engine }
    }

    /// Run the query on this engine. The session is closed on every path.
    pub async fn run(
        &self,
        sessions: &dyn SessionFactory,
        query: &SearchQuery,
        headless: bool,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let name = self.engine.config().name;
        let mut session = sessions.open(headless).await?;
        let outcome = self.drive(session.as_mut(), query).await;

        if let Err(e) = session.close().await {
            warn!(engine = name, error = %e, "Failed to close search session");
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut dyn ScrapeSession,
        query: &SearchQuery,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let engine = self.engine;
        let config = engine.config();
        let name = config.name;

        session.open_blank().await?;
        {
            let page = session.page()?;
            if !config.custom_headers.is_empty() {
                if let Err(e) = page.set_extra_headers(&config.custom_headers).await {
                    warn!(engine = name, error = %e, "Failed to set request headers");
                }
            }
            if let Some(domain) = config.cookie_domain {
                match page.clear_cookies(domain).await {
                    Ok(cleared) => debug!(engine = name, domain, cleared, "Cleared cookies"),
                    Err(e) => warn!(engine = name, error = %e, "Failed to clear cookies"),
                }
            }
        }

        session.navigate(config.homepage_url).await?;
        let page = session.page()?;
        let text = query.text();
        let text = text.as_str();

        let submitted = retry_until(SUBMIT_POLICY, "submit", move |_| async move {
            Ok(if engine.submit(page, text).await? {
                Attempt::Ready(())
            } else {
                Attempt::NotYet
            })
        })
        .await;
        if submitted.is_none() {
            return Err(SearchError::ScriptExhausted {
                target: name.to_string(),
                operation: "submit",
                attempts: SUBMIT_POLICY.max_attempts,
            });
        }
        tokio::time::sleep(config.wait_after_submit).await;

        let mut collected: Vec<RawResult> = Vec::new();
        for page_number in 1..=query.page_limit() {
            if page_number > 1 {
                let advanced = retry_until(NEXT_PAGE_POLICY, "next_page", move |_| async move {
                    Ok(if engine.next_page(page).await? {
                        Attempt::Ready(())
                    } else {
                        Attempt::NotYet
                    })
                })
                .await;
                if advanced.is_none() {
                    info!(engine = name, page_number, "No further result pages");
                    break;
                }
                tokio::time::sleep(config.wait_after_click).await;
            }

            let backoff = EXTRACT_POLICY.interval * 2;
            let extracted = retry_until(EXTRACT_POLICY, "extract", move |_| async move {
                if !engine.validate(page).await? {
                    return Ok(Attempt::Backoff(backoff));
                }
                let results = engine.extract(page).await?;
                Ok(if results.is_empty() {
                    Attempt::NotYet
                } else {
                    Attempt::Ready(results)
                })
            })
            .await;

            match extracted {
                Some(results) => {
                    debug!(engine = name, page_number, count = results.len(), "Extracted page");
                    collected.extend(results);
                }
                None => {
                    warn!(engine = name, page_number, "No results extracted, stopping");
                    break;
                }
            }
        }

        let results = dedup_by_url(
            collected
                .into_iter()
                .map(|raw| SearchResult::new(raw.title, raw.url, raw.description))
                .collect(),
        );
        info!(engine = name, count = results.len(), "Engine finished");
        Ok(results)
    }
}
