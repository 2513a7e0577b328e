//! Query, result and outcome types shared by the engines and platforms

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::platforms::PlatformReport;
use crate::utils::SearchError;
use crate::utils::constants::UNKNOWN_DOMAIN;

pub const MAX_KEYWORDS: usize = 4;
pub const MAX_PAGE_LIMIT: u32 = 10;

/// One web result as returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
    pub domain: String,
}

impl SearchResult {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            title: title.into(),
            domain: domain_of(&url),
            url,
            description: description.into(),
        }
    }
}

/// Host without `www.`, or `"unknown"`
pub fn domain_of(url: &str) -> String {
    crate::browser::root_domain(url).unwrap_or_else(|| UNKNOWN_DOMAIN.to_string())
}

/// Drop later results whose url was already seen, keeping order
pub fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|result| seen.insert(result.url.clone()))
        .collect()
}

/// Content platform a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    General,
    Shortform,
    Qa,
    Microblog,
    Linkaggregator,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::General,
        Platform::Shortform,
        Platform::Qa,
        Platform::Microblog,
        Platform::Linkaggregator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::General => "general",
            Platform::Shortform => "shortform",
            Platform::Qa => "qa",
            Platform::Microblog => "microblog",
            Platform::Linkaggregator => "linkaggregator",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = SearchError;

    /// Accepts the category names and the site each one is backed by
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" | "web" => Ok(Platform::General),
            "shortform" | "xiaohongshu" => Ok(Platform::Shortform),
            "qa" | "zhihu" => Ok(Platform::Qa),
            "microblog" | "weibo" => Ok(Platform::Microblog),
            "linkaggregator" | "reddit" => Ok(Platform::Linkaggregator),
            other => Err(SearchError::InvalidQuery(format!("unknown platform '{other}'"))),
        }
    }
}

/// Validated search request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchQuery {
    keywords: Vec<String>,
    page_limit: u32,
    platform: Platform,
}

impl SearchQuery {
    /// Trim, drop empty and duplicate keywords (first occurrence wins), then
    /// require 1..=4 keywords and a page limit of 1..=10.
    pub fn new<I, S>(keywords: I, page_limit: u32, platform: Platform) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .filter(|k| seen.insert(k.clone()))
            .collect();

        if keywords.is_empty() {
            return Err(SearchError::InvalidQuery(
                "at least one non-empty keyword is required".to_string(),
            ));
        }
        if keywords.len() > MAX_KEYWORDS {
            return Err(SearchError::InvalidQuery(format!(
                "at most {MAX_KEYWORDS} keywords are allowed, got {}",
                keywords.len()
            )));
        }
        if !(1..=MAX_PAGE_LIMIT).contains(&page_limit) {
            return Err(SearchError::InvalidQuery(format!(
                "page limit must be between 1 and {MAX_PAGE_LIMIT}, got {page_limit}"
            )));
        }

        Ok(Self {
            keywords,
            page_limit,
            platform,
        })
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn page_limit(&self) -> u32 {
        self.page_limit
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Keywords joined with single spaces
    pub fn text(&self) -> String {
        self.keywords.join(" ")
    }
}

/// Escape a string for embedding in a single-quoted JavaScript literal
pub fn escape_query(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchOutcome {
    Web {
        engine: String,
        results: Vec<SearchResult>,
    },
    Platform(PlatformReport),
}

impl SearchOutcome {
    /// Flatten to the plain result list
    pub fn to_search_results(&self) -> Vec<SearchResult> {
        match self {
            SearchOutcome::Web { results, .. } => results.clone(),
            SearchOutcome::Platform(report) => report
                .posts
                .iter()
                .map(|post| {
                    let title = post
                        .title
                        .clone()
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| truncate_chars(&post.content, 80));
                    SearchResult::new(title, post.link.clone(), truncate_chars(&post.content, 300))
                })
                .collect(),
        }
    }

    pub fn render_markdown(&self) -> String {
        match self {
            SearchOutcome::Web { engine, results } => {
                let mut out = format!("## Web results via {engine} ({} found)\n\n", results.len());
                for (n, result) in results.iter().enumerate() {
                    out.push_str(&format!(
                        "{}. [{}]({}) ({})\n",
                        n + 1,
                        result.title,
                        result.url,
                        result.domain
                    ));
                    if !result.description.is_empty() {
                        out.push_str(&format!("   {}\n", result.description));
                    }
                }
                out
            }
            SearchOutcome::Platform(report) => report.render_markdown(),
        }
    }
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max).collect();
    cut.push('…');
    cut
}
