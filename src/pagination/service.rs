//! Entry point for the read path.

use super::HistorySession;
use crate::chain::ResolvedCache;
use crate::config::HistoryConfig;
use crate::content::ContentStoreClient;
use crate::error::Result;
use crate::events::EventLog;
use crate::types::{ContentId, EntityId, EntrySource, HistoryEntry, PageView};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared read-side state: clients, the resolved-entry cache and one session
/// per entity.
pub struct HistoryService {
    content: Arc<ContentStoreClient>,
    log: Arc<dyn EventLog>,
    cache: Arc<ResolvedCache>,
    max_concurrent_fetches: usize,
    sessions: Mutex<HashMap<EntityId, Arc<HistorySession>>>,
}

impl HistoryService {
    pub fn new(
        content: Arc<ContentStoreClient>,
        log: Arc<dyn EventLog>,
        config: &HistoryConfig,
    ) -> Self {
        Self {
            content,
            log,
            cache: Arc::new(ResolvedCache::new()),
            max_concurrent_fetches: config.max_concurrent_fetches,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ResolvedCache> {
        &self.cache
    }

    /// The session for `entity_id`, created on first use.
    pub fn session(&self, entity_id: &EntityId) -> Arc<HistorySession> {
        let mut sessions = self.sessions.lock();
        Arc::clone(sessions.entry(entity_id.clone()).or_insert_with(|| {
            Arc::new(HistorySession::new(
                entity_id.clone(),
                Arc::clone(&self.content),
                Arc::clone(&self.log),
                Arc::clone(&self.cache),
                self.max_concurrent_fetches,
            ))
        }))
    }

    /// Number of sessions currently open.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drop the session for `entity_id`, cancelling anything in flight and
    /// releasing the entity's cached entries.
    pub fn close_session(&self, entity_id: &EntityId) {
        if let Some(session) = self.sessions.lock().remove(entity_id) {
            session.cancel();
        }
        let released = self.cache.remove_entity(entity_id);
        debug!(entity = %entity_id, released, "session closed");
    }

    pub async fn load_page(
        &self,
        entity_id: &EntityId,
        page: u32,
        page_size: u32,
    ) -> Result<PageView> {
        self.session(entity_id).load_page(page, page_size).await
    }

    pub async fn walk_full_history(
        &self,
        entity_id: &EntityId,
        start: &HistoryEntry,
        page: u32,
        page_size: u32,
    ) -> Result<PageView> {
        self.session(entity_id)
            .walk_full_history(start, page, page_size)
            .await
    }

    /// Newest snapshot visible in the event log, if any.
    pub async fn get_latest_version(&self, entity_id: &EntityId) -> Result<Option<HistoryEntry>> {
        self.get_latest_version_seeded(entity_id, None).await
    }

    /// Like [`get_latest_version`](Self::get_latest_version), but also
    /// considers `seed`: the identifier the backend stored alongside the
    /// entity on its last write, which the log may not show yet.
    pub async fn get_latest_version_seeded(
        &self,
        entity_id: &EntityId,
        seed: Option<&ContentId>,
    ) -> Result<Option<HistoryEntry>> {
        let page = self.log.query_page(entity_id, 1, 1).await?;
        let from_log = match page.events.first() {
            Some(event) => Some(self.resolve(entity_id, &event.content_identifier).await),
            None => None,
        };

        let from_seed = match seed.filter(|s| !s.is_empty()) {
            Some(seed) => Some(self.resolve(entity_id, seed).await),
            None => None,
        };

        match (from_log, from_seed) {
            (None, None) => Ok(None),
            (Some(log), None) => log.map(Some),
            (None, Some(seed)) => seed.map(Some),
            (Some(log), Some(seed)) => match (log, seed) {
                (Ok(log), Ok(seed)) => {
                    Ok(Some(if seed.version() > log.version() { seed } else { log }))
                }
                (Ok(log), Err(e)) => {
                    warn!(entity = %entity_id, error = %e, "seed snapshot unresolvable, using log");
                    Ok(Some(log))
                }
                (Err(e), Ok(seed)) => {
                    warn!(
                        entity = %entity_id,
                        error = %e,
                        "latest logged snapshot unresolvable, using seed"
                    );
                    Ok(Some(seed))
                }
                (Err(e), Err(_)) => Err(e),
            },
        }
    }

    async fn resolve(&self, entity_id: &EntityId, content_id: &ContentId) -> Result<HistoryEntry> {
        if let Some(entry) = self.cache.get_by_content(entity_id, content_id) {
            return Ok(entry);
        }
        let snapshot = self.content.resolve(content_id).await?;
        let entry = HistoryEntry::new(content_id.clone(), snapshot, EntrySource::Fetched);
        self.cache.insert(entity_id, &entry);
        Ok(entry)
    }
}
