//! Content store client with ordered endpoint fallback.

use super::{Gateway, HttpGateway, HttpPublisher, Publisher};
use crate::config::HistoryConfig;
use crate::error::{AttemptError, HistoryError, Result};
use crate::types::{ContentId, VersionSnapshot};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Typed result of one endpoint attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// This endpoint failed; advance to the next one.
    Retryable(AttemptError),
    /// The request itself is unacceptable; stop the sequence.
    Terminal(AttemptError),
}

/// Client over ordered write backends and read gateways.
pub struct ContentStoreClient {
    gateways: Vec<Arc<dyn Gateway>>,
    publishers: Vec<Arc<dyn Publisher>>,
    attempt_timeout: Duration,
    /// Verified blobs by identifier.
    cache: Mutex<LruCache<ContentId, Arc<Vec<u8>>>>,
}

impl ContentStoreClient {
    pub fn new(
        gateways: Vec<Arc<dyn Gateway>>,
        publishers: Vec<Arc<dyn Publisher>>,
        attempt_timeout: Duration,
        cache_size: usize,
    ) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            gateways,
            publishers,
            attempt_timeout,
            cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    /// Build HTTP gateways and publishers from configuration.
    pub fn from_config(config: &HistoryConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .build()
            .map_err(|e| HistoryError::Config(e.to_string()))?;

        let gateways = config
            .gateways
            .iter()
            .map(|template| {
                Arc::new(HttpGateway::with_client(template.clone(), http.clone()))
                    as Arc<dyn Gateway>
            })
            .collect();

        let publishers = config
            .publishers
            .iter()
            .map(|p| {
                Arc::new(HttpPublisher::with_client(p.clone(), http.clone())) as Arc<dyn Publisher>
            })
            .collect();

        Ok(Self::new(
            gateways,
            publishers,
            config.attempt_timeout,
            config.content_cache_size,
        ))
    }

    pub fn gateway_count(&self) -> usize {
        self.gateways.len()
    }

    /// Whether a verified copy of `content_id` is held in memory.
    pub fn is_cached(&self, content_id: &ContentId) -> bool {
        self.cache.lock().contains(content_id)
    }

    /// Store a blob on the first backend that accepts it.
    pub async fn put(&self, blob: &[u8]) -> Result<ContentId> {
        if blob.is_empty() {
            return Err(HistoryError::InvalidArgument("refusing to store an empty blob".into()));
        }

        let mut attempts = 0;
        let mut last_error = String::from("no backends configured");

        for publisher in &self.publishers {
            attempts += 1;
            let start = Instant::now();

            let outcome = match timeout(self.attempt_timeout, publisher.publish(blob)).await {
                Ok(Ok(id)) if id.is_empty() => {
                    AttemptOutcome::Retryable(AttemptError::Malformed("empty identifier".into()))
                }
                Ok(Ok(id)) => AttemptOutcome::Success(id),
                Ok(Err(AttemptError::Status(413))) => {
                    AttemptOutcome::Terminal(AttemptError::Status(413))
                }
                Ok(Err(e)) => AttemptOutcome::Retryable(e),
                Err(_) => AttemptOutcome::Retryable(AttemptError::Timeout),
            };

            match outcome {
                AttemptOutcome::Success(id) => {
                    debug!(
                        backend = publisher.name(),
                        content_id = %id,
                        elapsed = ?start.elapsed(),
                        "stored snapshot blob"
                    );
                    return Ok(id);
                }
                AttemptOutcome::Retryable(e) => {
                    warn!(
                        backend = publisher.name(),
                        error = %e,
                        "backend write failed, trying next"
                    );
                    last_error = e.to_string();
                }
                AttemptOutcome::Terminal(e) => {
                    error!(backend = publisher.name(), error = %e, "backend refused blob");
                    last_error = e.to_string();
                    break;
                }
            }
        }

        error!(attempts, last_error = %last_error, "all storage backends failed");
        Err(HistoryError::StoreUnavailable {
            attempts,
            last_error,
        })
    }

    /// Fetch a blob, trying each gateway in order.
    ///
    /// A body that does not decode as a snapshot counts as a failed attempt.
    pub async fn get(&self, content_id: &ContentId) -> Result<Vec<u8>> {
        self.fetch_verified(content_id)
            .await
            .map(|(bytes, _)| bytes.as_ref().clone())
    }

    /// Fetch and decode a snapshot.
    pub async fn resolve(&self, content_id: &ContentId) -> Result<VersionSnapshot> {
        let (bytes, snapshot) = self.fetch_verified(content_id).await?;
        match snapshot {
            Some(snapshot) => Ok(snapshot),
            None => VersionSnapshot::decode(&bytes),
        }
    }

    async fn fetch_verified(
        &self,
        content_id: &ContentId,
    ) -> Result<(Arc<Vec<u8>>, Option<VersionSnapshot>)> {
        if content_id.is_empty() {
            return Err(HistoryError::ContentUnavailable {
                content_id: content_id.clone(),
                attempts: 0,
                last_error: "empty content identifier".into(),
            });
        }

        if let Some(bytes) = self.cache.lock().get(content_id).cloned() {
            return Ok((bytes, None));
        }

        let mut attempts = 0;
        let mut last_error = String::from("no gateways configured");

        for gateway in &self.gateways {
            attempts += 1;
            let start = Instant::now();

            match self.attempt_fetch(gateway.as_ref(), content_id).await {
                AttemptOutcome::Success((bytes, snapshot)) => {
                    debug!(
                        gateway = gateway.name(),
                        content_id = %content_id,
                        elapsed = ?start.elapsed(),
                        "resolved snapshot"
                    );
                    let bytes = Arc::new(bytes);
                    self.cache.lock().put(content_id.clone(), Arc::clone(&bytes));
                    return Ok((bytes, Some(snapshot)));
                }
                AttemptOutcome::Retryable(e) => {
                    warn!(
                        gateway = gateway.name(),
                        content_id = %content_id,
                        attempt = attempts,
                        error = %e,
                        "gateway fetch failed, trying next"
                    );
                    last_error = e.to_string();
                }
                AttemptOutcome::Terminal(e) => {
                    last_error = e.to_string();
                    break;
                }
            }
        }

        error!(content_id = %content_id, attempts, "all gateways exhausted");
        Err(HistoryError::ContentUnavailable {
            content_id: content_id.clone(),
            attempts,
            last_error,
        })
    }

    async fn attempt_fetch(
        &self,
        gateway: &dyn Gateway,
        content_id: &ContentId,
    ) -> AttemptOutcome<(Vec<u8>, VersionSnapshot)> {
        match timeout(self.attempt_timeout, gateway.fetch(content_id)).await {
            Ok(Ok(bytes)) => match VersionSnapshot::decode(&bytes) {
                Ok(snapshot) => AttemptOutcome::Success((bytes, snapshot)),
                Err(e) => AttemptOutcome::Retryable(AttemptError::Malformed(e.to_string())),
            },
            Ok(Err(e)) => AttemptOutcome::Retryable(e),
            Err(_) => AttemptOutcome::Retryable(AttemptError::Timeout),
        }
    }
}
