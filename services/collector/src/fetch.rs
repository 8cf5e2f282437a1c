//! Raw payload sources. No retries: a failed fetch surfaces as [`FetchError`].

use std::path::PathBuf;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::feeds::Feed;

pub const USER_AGENT: &str = "covid-importer/0.1 (feed import pipeline)";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// `HTTP_TIMEOUT_SECS`, or the default when unset or unparseable
pub fn http_timeout_from_vars(var: impl Fn(&str) -> Option<String>) -> Duration {
    var("HTTP_TIMEOUT_SECS")
        .and_then(|v| v.parse().ok())
        .map_or(DEFAULT_HTTP_TIMEOUT, Duration::from_secs)
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for feed '{feed}' failed: {source}")]
    Request {
        feed: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("feed '{feed}' returned HTTP {status}")]
    Status { feed: String, status: StatusCode },

    #[error("failed to read feed '{feed}' from {}: {source}", path.display())]
    Io {
        feed: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Anything that can hand over a feed's payload as text.
#[allow(async_fn_in_trait)]
pub trait FeedSource {
    async fn fetch_text(&self, feed: &Feed) -> Result<String, FetchError>;
}

/// Plain HTTP GET against the feed URL
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, feed: &Feed) -> Result<Vec<u8>, FetchError> {
        debug!(feed = %feed.name, url = %feed.url, "fetching");
        let resp = self
            .client
            .get(&feed.url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                feed: feed.name.clone(),
                source,
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                feed: feed.name.clone(),
                status,
            });
        }

        let bytes = resp.bytes().await.map_err(|source| FetchError::Request {
            feed: feed.name.clone(),
            source,
        })?;
        info!(feed = %feed.name, bytes = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }
}

impl FeedSource for HttpSource {
    async fn fetch_text(&self, feed: &Feed) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(feed).await?;
        Ok(decode_text(&bytes))
    }
}

/// Replays feeds previously captured to a directory, one file per feed.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, feed: &Feed) -> PathBuf {
        self.dir.join(&feed.file_name)
    }
}

impl FeedSource for DirSource {
    async fn fetch_text(&self, feed: &Feed) -> Result<String, FetchError> {
        let path = self.path_for(feed);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| FetchError::Io {
                feed: feed.name.clone(),
                path: path.clone(),
                source,
            })?;
        debug!(feed = %feed.name, path = %path.display(), bytes = bytes.len(), "read captured feed");
        Ok(decode_text(&bytes))
    }
}

/// Decode a payload as UTF-8 and drop a leading byte order mark.
pub fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.strip_prefix('\u{feff}').unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::FeedCatalog;

    #[test]
    fn test_http_timeout_from_vars() {
        assert_eq!(http_timeout_from_vars(|_| None), DEFAULT_HTTP_TIMEOUT);
        assert_eq!(
            http_timeout_from_vars(|name| (name == "HTTP_TIMEOUT_SECS").then(|| "30".to_string())),
            Duration::from_secs(30)
        );
        assert_eq!(
            http_timeout_from_vars(|_| Some("soon".to_string())),
            DEFAULT_HTTP_TIMEOUT
        );
    }

    #[test]
    fn test_decode_text_strips_bom() {
        let bytes = "\u{feff}UID,iso2\n1,DE\n".as_bytes();
        assert_eq!(decode_text(bytes), "UID,iso2\n1,DE\n");
    }

    #[test]
    fn test_decode_text_plain() {
        assert_eq!(decode_text(b"a,b\n"), "a,b\n");
    }

    #[tokio::test]
    async fn test_dir_source_reads_captured_feed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FeedCatalog::default();
        let feed = catalog.cases_time();
        std::fs::write(dir.path().join("cases_time.csv"), "Country_Region\nGermany\n").unwrap();

        let source = DirSource::new(dir.path());
        let text = source.fetch_text(&feed).await.unwrap();
        assert_eq!(text, "Country_Region\nGermany\n");
    }

    #[tokio::test]
    async fn test_dir_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirSource::new(dir.path());
        let feed = FeedCatalog::default().cases_country();

        let err = source.fetch_text(&feed).await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
        assert!(err.to_string().contains("cases_country"));
    }

    #[test]
    fn test_status_error_message() {
        let err = FetchError::Status {
            feed: "cases_time".to_string(),
            status: StatusCode::NOT_FOUND,
        };
        assert_eq!(err.to_string(), "feed 'cases_time' returned HTTP 404 Not Found");
    }
}
