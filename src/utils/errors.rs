use thiserror::Error;

use crate::browser::BrowserError;
use crate::web_search::Platform;

/// Errors surfaced to callers of the search and fetch entry points
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown search engine: {0}")]
    UnknownEngine(String),

    #[error("All search engines failed (tried {}). Last error: {last_error}", attempted.join(", "))]
    EnginesExhausted {
        attempted: Vec<String>,
        last_error: String,
    },

    #[error("{target}: '{operation}' did not succeed after {attempts} attempts")]
    ScriptExhausted {
        target: String,
        operation: &'static str,
        attempts: u32,
    },

    #[error("{platform} search failed: {message}")]
    Platform { platform: Platform, message: String },

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for SearchError {
    fn from(err: std::io::Error) -> Self {
        SearchError::IoError(err.to_string())
    }
}

impl From<anyhow::Error> for SearchError {
    fn from(err: anyhow::Error) -> Self {
        SearchError::Extraction(format!("{err:#}"))
    }
}
