//! Engine fallback chain and platform dispatch

use std::sync::Arc;

use tracing::{info, warn};

use super::engines::{DEFAULT_ENGINE_PRIORITY, SearchEngine, engine_by_name};
use super::scraper::GenericSearchScraper;
use super::types::{Platform, SearchOutcome, SearchQuery};
use crate::browser::SessionFactory;
use crate::platforms::{PlatformOptions, run_platform, scraper_for};
use crate::utils::SearchError;

/// Builds a fresh engine for a configured name
pub type EngineFactory = Arc<dyn Fn(&str) -> Option<Box<dyn SearchEngine>> + Send + Sync>;

pub struct SearchOrchestrator {
    sessions: Arc<dyn SessionFactory>,
    engine_priority: Vec<String>,
    engines: EngineFactory,
    headless: bool,
    platform_options: PlatformOptions,
}

impl SearchOrchestrator {
    /// Orchestrator over the built-in engines in `engine_priority` order.
    ///
    /// Unknown names are rejected up front; an empty list means the default
    /// order.
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        engine_priority: Vec<String>,
    ) -> Result<Self, SearchError> {
        let engine_priority = if engine_priority.is_empty() {
            DEFAULT_ENGINE_PRIORITY.iter().map(|s| s.to_string()).collect()
        } else {
            engine_priority
        };
        if let Some(unknown) = engine_priority
            .iter()
            .find(|name| engine_by_name(name).is_none())
        {
            return Err(SearchError::UnknownEngine(unknown.clone()));
        }

        Ok(Self {
            sessions,
            engine_priority,
            engines: Arc::new(engine_by_name),
            headless: false,
            platform_options: PlatformOptions::default(),
        })
    }

    /// Replace how engines are built, keeping the priority names
    pub fn with_engine_factory(mut self, engines: EngineFactory) -> Self {
        self.engines = engines;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_platform_options(mut self, options: PlatformOptions) -> Self {
        self.platform_options = options;
        self
    }

    pub fn engine_priority(&self) -> &[String] {
        &self.engine_priority
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchOutcome, SearchError> {
        match query.platform() {
            Platform::General => self.search_general(query).await,
            platform => self.search_platform(platform, query).await,
        }
    }

    async fn search_general(&self, query: &SearchQuery) -> Result<SearchOutcome, SearchError> {
        let mut attempted = Vec::new();
        let mut last_error = String::from("no engines configured");

        for name in &self.engine_priority {
            let engine = (self.engines)(name).ok_or_else(|| SearchError::UnknownEngine(name.clone()))?;
            attempted.push(name.clone());
            info!(engine = %name, query = %query.text(), "Trying search engine");

            match GenericSearchScraper::new(engine.as_ref())
                .run(self.sessions.as_ref(), query, self.headless)
                .await
            {
                Ok(results) if !results.is_empty() => {
                    info!(engine = %name, count = results.len(), "Search engine succeeded");
                    return Ok(SearchOutcome::Web {
                        engine: name.clone(),
                        results,
                    });
                }
                Ok(_) => {
                    warn!(engine = %name, "Search engine returned no results");
                    last_error = format!("{name} returned no results");
                }
                Err(e) => {
                    warn!(engine = %name, error = %e, "Search engine failed");
                    last_error = format!("{name}: {e}");
                }
            }
        }

        Err(SearchError::EnginesExhausted {
            attempted,
            last_error,
        })
    }

    async fn search_platform(
        &self,
        platform: Platform,
        query: &SearchQuery,
    ) -> Result<SearchOutcome, SearchError> {
        let wrap = |message: String| SearchError::Platform { platform, message };
        let scraper = scraper_for(platform).ok_or_else(|| wrap("no scraper".to_string()))?;

        let mut session = self
            .sessions
            .open(self.headless)
            .await
            .map_err(|e| wrap(e.to_string()))?;
        let outcome = run_platform(
            scraper.as_ref(),
            session.as_mut(),
            query,
            &self.platform_options,
        )
        .await;
        if let Err(e) = session.close().await {
            warn!(platform = %platform, error = %e, "Failed to close platform session");
        }

        outcome
            .map(SearchOutcome::Platform)
            .map_err(|e| wrap(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{FakeFactory, FakePage};
    use crate::web_search::scraper::tests::{ScriptedEngine, raw};

    /// Engine factory over scripted result counts, recording build order
    fn scripted(
        script: Vec<(&'static str, usize)>,
    ) -> (EngineFactory, Arc<Mutex<Vec<String>>>) {
        let built = Arc::new(Mutex::new(Vec::new()));
        let log = built.clone();
        let factory: EngineFactory = Arc::new(move |name: &str| {
            let (name, count) = script.iter().find(|(n, _)| *n == name).copied()?;
            log.lock().unwrap().push(name.to_string());
            let page = (1..=count).map(raw).collect();
            Some(Box::new(ScriptedEngine::new(name, vec![page])) as Box<dyn SearchEngine>)
        });
        (factory, built)
    }

    fn orchestrator(
        factory: Arc<FakeFactory>,
        names: &[&str],
        engines: EngineFactory,
    ) -> SearchOrchestrator {
        SearchOrchestrator {
            sessions: factory,
            engine_priority: names.iter().map(|s| s.to_string()).collect(),
            engines,
            headless: false,
            platform_options: PlatformOptions::default(),
        }
    }

    fn weather() -> SearchQuery {
        SearchQuery::new(["weather", "tomorrow"], 1, Platform::General).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn first_engine_with_results_wins() {
        let sessions = Arc::new(FakeFactory::new(vec![]));
        let (engines, built) = scripted(vec![("alpha", 8), ("beta", 3)]);
        let outcome = orchestrator(sessions.clone(), &["alpha", "beta"], engines)
            .search(&weather())
            .await
            .unwrap();

        let SearchOutcome::Web { engine, results } = outcome else {
            panic!("expected web outcome");
        };
        assert_eq!(engine, "alpha");
        assert_eq!(results.len(), 8);
        assert_eq!(*built.lock().unwrap(), ["alpha"]);
        assert_eq!(sessions.opened(), 1);
        assert!(sessions.all_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn falls_through_empty_engines() {
        let sessions = Arc::new(FakeFactory::new(vec![]));
        let (engines, built) = scripted(vec![("alpha", 0), ("beta", 0), ("gamma", 5)]);
        let outcome = orchestrator(sessions.clone(), &["alpha", "beta", "gamma"], engines)
            .search(&weather())
            .await
            .unwrap();

        assert_eq!(outcome.to_search_results().len(), 5);
        assert_eq!(*built.lock().unwrap(), ["alpha", "beta", "gamma"]);
        assert!(sessions.all_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_every_engine_in_order() {
        let sessions = Arc::new(FakeFactory::new(vec![]));
        let names = ["delta", "alpha", "gamma", "beta"];
        let (engines, built) = scripted(names.iter().map(|n| (*n, 0)).collect());

        let err = orchestrator(sessions.clone(), &names, engines)
            .search(&weather())
            .await
            .unwrap_err();

        let SearchError::EnginesExhausted { attempted, last_error } = err else {
            panic!("expected exhaustion");
        };
        assert_eq!(attempted, names);
        assert_eq!(*built.lock().unwrap(), names);
        assert_eq!(sessions.opened(), names.len());
        assert!(last_error.contains("beta"));
    }

    #[test]
    fn rejects_unknown_engine_names() {
        let sessions: Arc<dyn SessionFactory> = Arc::new(FakeFactory::new(vec![]));
        let err = SearchOrchestrator::new(sessions.clone(), vec!["bing".into(), "lycos".into()])
            .err()
            .unwrap();
        assert!(matches!(err, SearchError::UnknownEngine(name) if name == "lycos"));

        let defaults = SearchOrchestrator::new(sessions, Vec::new()).unwrap();
        assert_eq!(
            defaults.engine_priority(),
            ["bing", "duckduckgo", "google", "baidu"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn platform_failures_are_wrapped() {
        let page = Arc::new(FakePage::with_html("<div>please log in</div>"));
        let sessions = Arc::new(FakeFactory::new(vec![page]));
        let (engines, _) = scripted(vec![]);
        let query = SearchQuery::new(["golang"], 1, Platform::Linkaggregator).unwrap();

        let err = orchestrator(sessions.clone(), &[], engines)
            .search(&query)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SearchError::Platform { platform: Platform::Linkaggregator, .. }
        ));
        assert!(sessions.all_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn platform_no_results_is_not_an_error() {
        let page = Arc::new(FakePage::with_html("<div id='no-results'>Hm... we couldn't find any results</div>"));
        let sessions = Arc::new(FakeFactory::new(vec![page.clone()]));
        let (engines, _) = scripted(vec![]);
        let query = SearchQuery::new(["community/golang error handling"], 1, Platform::Linkaggregator)
            .unwrap();

        let outcome = orchestrator(sessions, &[], engines)
            .search(&query)
            .await
            .unwrap();

        let SearchOutcome::Platform(report) = outcome else {
            panic!("expected platform outcome");
        };
        assert!(report.no_results);
        assert_eq!(
            page.gotos(),
            vec!["https://www.reddit.com/r/golang/search/?q=error%20handling&restrict_sr=1".to_string()]
        );
    }
}
