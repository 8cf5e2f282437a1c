//! Collector - Feed catalog and raw payload sources
//!
//! Responsibilities:
//! - Name every remote document the importer consumes (CSV and JSON feeds)
//! - Build feed URLs from fixed, overridable base URLs
//! - Fetch raw payloads over HTTP, or replay them from a captured directory
//!
//! Pure I/O: nothing in this crate parses feed contents.

pub mod feeds;
pub mod fetch;

pub use feeds::{CountryDocument, Feed, FeedCatalog, FeedFormat};
pub use fetch::{http_timeout_from_vars, DirSource, FeedSource, FetchError, HttpSource, DEFAULT_HTTP_TIMEOUT};
