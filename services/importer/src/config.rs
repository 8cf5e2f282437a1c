use std::time::Duration;

use collector::{http_timeout_from_vars, FeedCatalog};

use crate::error::{ImportError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub max_connections: u32,
    pub http_timeout: Duration,
    pub catalog: FeedCatalog,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Unparseable numeric settings fall back to their defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            db_url: var("DB_URL").ok_or(ImportError::MissingEnv("DB_URL"))?,
            max_connections: var("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            http_timeout: http_timeout_from_vars(&var),
            catalog: FeedCatalog::from_vars(&var),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let env = vars(&[("DB_URL", "postgres://localhost/covid")]);
        let config = Config::from_vars(|name| env.get(name).cloned()).unwrap();
        assert_eq!(config.db_url, "postgres://localhost/covid");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.catalog, FeedCatalog::default());
    }

    #[test]
    fn test_missing_db_url() {
        let err = Config::from_vars(|_| None).unwrap_err();
        assert!(matches!(err, ImportError::MissingEnv("DB_URL")));
    }

    #[test]
    fn test_overrides() {
        let env = vars(&[
            ("DB_URL", "postgres://db/covid"),
            ("DB_MAX_CONNECTIONS", "2"),
            ("HTTP_TIMEOUT_SECS", "not-a-number"),
            ("COUNTRY_JSON_BASE_URL", "http://mirror/json/"),
        ]);
        let config = Config::from_vars(|name| env.get(name).cloned()).unwrap();
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.http_timeout, Duration::from_secs(120));
        assert_eq!(config.catalog.country_json_base, "http://mirror/json/");
    }
}
