//! Runtime configuration.

use crate::error::{HistoryError, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Placeholder substituted with the content identifier in gateway templates.
pub const CID_PLACEHOLDER: &str = "{cid}";

/// Default public retrieval gateways, tried in order.
pub const DEFAULT_GATEWAYS: &[&str] = &[
    "https://gateway.pinata.cloud/ipfs/{cid}",
    "https://ipfs.io/ipfs/{cid}",
    "https://dweb.link/ipfs/{cid}",
];

/// A write backend reached over HTTP.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub name: String,
    /// Endpoint receiving the JSON blob via POST.
    pub url: String,
    /// JSON pointer to the identifier in the response body.
    pub id_pointer: String,
    pub bearer_token: Option<String>,
}

/// History subsystem configuration.
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    /// Gateway URL templates containing `{cid}`.
    pub gateways: Vec<String>,

    /// Write backends, tried in order.
    pub publishers: Vec<PublisherConfig>,

    /// Budget for a single gateway or backend attempt.
    pub attempt_timeout: Duration,

    /// Upper bound on concurrent fetches while loading a page.
    pub max_concurrent_fetches: usize,

    /// Verified blobs kept in memory (by content identifier).
    pub content_cache_size: usize,

    /// Page size used when the caller has no preference.
    pub default_page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            gateways: DEFAULT_GATEWAYS.iter().map(|g| g.to_string()).collect(),
            publishers: Vec::new(),
            attempt_timeout: Duration::from_secs(5),
            max_concurrent_fetches: 4,
            content_cache_size: 256,
            default_page_size: 10,
        }
    }
}

impl HistoryConfig {
    /// Defaults overridden by `HISTORY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(gateways) = env::var("HISTORY_GATEWAYS") {
            config.gateways = gateways
                .split(',')
                .map(str::trim)
                .filter(|g| !g.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(url) = env::var("HISTORY_PUBLISHER_URL") {
            config.publishers.push(PublisherConfig {
                name: "primary".to_string(),
                url,
                id_pointer: env::var("HISTORY_PUBLISHER_ID_POINTER")
                    .unwrap_or_else(|_| "/IpfsHash".to_string()),
                bearer_token: env::var("HISTORY_PUBLISHER_TOKEN").ok(),
            });
        }

        if let Some(ms) = parse_var::<u64>("HISTORY_ATTEMPT_TIMEOUT_MS")? {
            config.attempt_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var("HISTORY_MAX_CONCURRENT_FETCHES")? {
            config.max_concurrent_fetches = n;
        }
        if let Some(n) = parse_var("HISTORY_CONTENT_CACHE_SIZE")? {
            config.content_cache_size = n;
        }
        if let Some(n) = parse_var("HISTORY_PAGE_SIZE")? {
            config.default_page_size = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout.is_zero() {
            return Err(HistoryError::Config("attempt_timeout must be non-zero".into()));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(HistoryError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        if self.default_page_size == 0 {
            return Err(HistoryError::Config("default_page_size must be at least 1".into()));
        }
        if let Some(bad) = self.gateways.iter().find(|g| !g.contains(CID_PLACEHOLDER)) {
            return Err(HistoryError::Config(format!(
                "gateway template {} has no {} placeholder",
                bad, CID_PLACEHOLDER
            )));
        }
        Ok(())
    }

    /// Worst-case latency of one full fallback sequence over the gateways.
    pub fn aggregate_read_timeout(&self) -> Duration {
        self.attempt_timeout * self.gateways.len() as u32
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| HistoryError::Config(format!("{} has invalid value {:?}", name, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = HistoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.aggregate_read_timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_rejects_template_without_placeholder() {
        let config = HistoryConfig {
            gateways: vec!["https://ipfs.io/ipfs/".into()],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HistoryError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_fan_out() {
        let config = HistoryConfig {
            max_concurrent_fetches: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
