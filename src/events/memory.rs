//! In-memory event log.

use super::{paginate, EventLog, EventPage};
use crate::error::{HistoryError, Result};
use crate::types::{ContentId, EntityId, EventRecord};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

struct StoredEvent {
    record: EventRecord,
    visible_at: Instant,
}

/// Event log held in memory.
///
/// An optional visibility lag hides fresh appends from queries for a while,
/// the same way an indexer trailing the chain would.
#[derive(Default)]
pub struct MemoryEventLog {
    events: RwLock<HashMap<EntityId, Vec<StoredEvent>>>,
    next_index: AtomicU64,
    visibility_lag: Duration,
    reject_appends: AtomicBool,
    queries: AtomicUsize,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visibility_lag(lag: Duration) -> Self {
        Self {
            visibility_lag: lag,
            ..Self::default()
        }
    }

    pub fn set_reject_appends(&self, reject: bool) {
        self.reject_appends.store(reject, Ordering::SeqCst);
    }

    /// Number of `query_page` calls served.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// All events for an entity, visible or not, oldest first.
    pub fn all_events(&self, entity_id: &EntityId) -> Vec<EventRecord> {
        self.events
            .read()
            .get(entity_id)
            .map(|stored| stored.iter().map(|s| s.record.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, entity_id: &EntityId, content_id: &ContentId) -> Result<EventRecord> {
        if self.reject_appends.load(Ordering::SeqCst) {
            return Err(HistoryError::AppendRejected {
                entity_id: entity_id.clone(),
                content_id: content_id.clone(),
                reason: "log unavailable".into(),
            });
        }

        let record = EventRecord {
            entity_id: entity_id.clone(),
            content_identifier: content_id.clone(),
            sequence_index: self.next_index.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now().timestamp_millis(),
        };

        self.events
            .write()
            .entry(entity_id.clone())
            .or_default()
            .push(StoredEvent {
                record: record.clone(),
                visible_at: Instant::now() + self.visibility_lag,
            });

        Ok(record)
    }

    async fn query_page(
        &self,
        entity_id: &EntityId,
        page: u32,
        page_size: u32,
    ) -> Result<EventPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();

        let visible: Vec<EventRecord> = self
            .events
            .read()
            .get(entity_id)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|s| s.visible_at <= now)
                    .map(|s| s.record.clone())
                    .collect()
            })
            .unwrap_or_default();

        paginate(&visible, page, page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_assigns_increasing_indices() {
        let log = MemoryEventLog::new();
        let entity = EntityId::new("manga-1");

        let a = log.append(&entity, &ContentId::new("a")).await.unwrap();
        let b = log.append(&entity, &ContentId::new("b")).await.unwrap();
        assert!(b.sequence_index > a.sequence_index);

        let page = log.query_page(&entity, 1, 10).await.unwrap();
        assert_eq!(page.events[0].content_identifier, ContentId::new("b"));
    }

    #[tokio::test]
    async fn test_entities_are_isolated() {
        let log = MemoryEventLog::new();
        log.append(&EntityId::new("a"), &ContentId::new("x")).await.unwrap();

        let page = log.query_page(&EntityId::new("b"), 1, 10).await.unwrap();
        assert!(page.events.is_empty());
        assert_eq!(page.total_pages, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visibility_lag() {
        let log = MemoryEventLog::with_visibility_lag(Duration::from_secs(2));
        let entity = EntityId::new("manga-1");
        log.append(&entity, &ContentId::new("a")).await.unwrap();

        let page = log.query_page(&entity, 1, 10).await.unwrap();
        assert!(page.events.is_empty());

        tokio::time::advance(Duration::from_secs(3)).await;
        let page = log.query_page(&entity, 1, 10).await.unwrap();
        assert_eq!(page.events.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_append() {
        let log = MemoryEventLog::new();
        log.set_reject_appends(true);
        let result = log.append(&EntityId::new("a"), &ContentId::new("x")).await;
        assert!(matches!(result, Err(HistoryError::AppendRejected { .. })));
        assert!(log.all_events(&EntityId::new("a")).is_empty());
    }
}
