//! Import error types
//!
//! Only feed-level and storage failures are errors. Row-level problems
//! (malformed rows, unresolved country codes, unparsed dates) are absorbed
//! and counted in [`crate::FeedReport`].

use collector::FetchError;
use thiserror::Error;

use crate::run::Stage;
use crate::store::StoreError;

/// Result type for import operations
pub type Result<T> = std::result::Result<T, ImportError>;

#[derive(Debug, Error)]
pub enum ImportError {
    /// Download failed; aborts the current run
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Statement against the store failed; aborts the current run
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Header row could not be read
    #[error("failed to read CSV feed '{feed}': {source}")]
    Csv {
        feed: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to parse JSON document '{feed}': {source}")]
    Json {
        feed: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("feed '{feed}' has no column matching {candidates:?}")]
    MissingColumn {
        feed: String,
        candidates: &'static [&'static str],
    },

    #[error("feed '{feed}' is empty")]
    EmptyFeed { feed: String },

    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    /// A pipeline stage failed; later stages of the run were skipped
    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: Stage, message: String },
}

impl ImportError {
    pub fn missing_column(feed: impl Into<String>, candidates: &'static [&'static str]) -> Self {
        Self::MissingColumn {
            feed: feed.into(),
            candidates,
        }
    }

    pub fn empty_feed(feed: impl Into<String>) -> Self {
        Self::EmptyFeed { feed: feed.into() }
    }

    pub fn csv(feed: impl Into<String>, source: csv::Error) -> Self {
        Self::Csv {
            feed: feed.into(),
            source,
        }
    }

    pub fn json(feed: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            feed: feed.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_error() {
        let err = ImportError::missing_column("cases_time", &["country_region"]);
        assert!(err.to_string().contains("cases_time"));
        assert!(err.to_string().contains("country_region"));
    }

    #[test]
    fn test_empty_feed_error() {
        let err = ImportError::empty_feed("cases_country");
        assert_eq!(err.to_string(), "feed 'cases_country' is empty");
    }

    #[test]
    fn test_stage_error() {
        let err = ImportError::Stage {
            stage: Stage::Recovered,
            message: "feed 'recovered_series' returned HTTP 404 Not Found".to_string(),
        };
        assert!(err.to_string().starts_with("stage 'recovered' failed"));
    }
}
