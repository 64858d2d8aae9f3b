//! Runtime configuration for the console.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::domain::DEFAULT_LIMIT;
use crate::error::ApiError;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const API_VERSION: &str = "v1";

#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Server root; requests go to `{api_url}/v1/...`.
    pub api_url: Url,
    pub request_timeout: Duration,
    /// How long a fetched query counts as fresh.
    pub stale_time: Duration,
    /// Automatic retries for a failed list query.
    pub list_retries: usize,
    pub retry_delay: Duration,
    pub default_limit: u32,
    pub cache_buffer: usize,
    pub catalog_path: Option<PathBuf>,
    pub credentials_path: PathBuf,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default api url is valid"),
            request_timeout: Duration::from_secs(30),
            stale_time: Duration::from_secs(5 * 60),
            list_retries: 1,
            retry_delay: Duration::from_secs(1),
            default_limit: DEFAULT_LIMIT,
            cache_buffer: 64,
            catalog_path: None,
            credentials_path: default_credentials_path(),
        }
    }
}

impl ConsoleConfig {
    /// Reads `API_URL`, `ADMIN_CATALOG` and `ADMIN_CREDENTIALS`.
    pub fn from_env() -> Result<Self, ApiError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("API_URL") {
            config.api_url = parse_api_url(&raw)?;
        }
        if let Ok(path) = std::env::var("ADMIN_CATALOG") {
            config.catalog_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("ADMIN_CREDENTIALS") {
            config.credentials_path = PathBuf::from(path);
        }
        Ok(config)
    }

    /// The versioned REST base, e.g. `http://localhost:3000/v1`.
    pub fn api_base(&self) -> Result<Url, ApiError> {
        let mut base = self.api_url.clone();
        base.path_segments_mut()
            .map_err(|_| ApiError::Network(format!("{} cannot be a base url", self.api_url)))?
            .pop_if_empty()
            .push(API_VERSION);
        Ok(base)
    }
}

pub fn parse_api_url(raw: &str) -> Result<Url, ApiError> {
    Url::parse(raw.trim()).map_err(|e| ApiError::Network(format!("invalid API_URL {raw:?}: {e}")))
}

pub fn default_credentials_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".admin-console")
        .join("credentials.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_base_appends_version() {
        let mut config = ConsoleConfig::default();
        assert_eq!(config.api_base().unwrap().as_str(), "http://localhost:3000/v1");

        config.api_url = parse_api_url("https://admin.example.com/api/").unwrap();
        assert_eq!(
            config.api_base().unwrap().as_str(),
            "https://admin.example.com/api/v1"
        );
    }

    #[test]
    fn defaults_match_query_contract() {
        let config = ConsoleConfig::default();
        assert_eq!(config.stale_time, Duration::from_secs(300));
        assert_eq!(config.list_retries, 1);
        assert_eq!(config.default_limit, 10);
        assert!(parse_api_url("not a url").is_err());
    }
}
