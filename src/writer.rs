//! Write path: build, store and anchor a snapshot for each mutation.

use crate::content::ContentStoreClient;
use crate::error::{HistoryError, Result};
use crate::events::EventLog;
use crate::snapshot::build_snapshot;
use crate::subscriptions::{HistoryEvent, SubscriptionManager};
use crate::types::{
    ContentId, EntityId, EntrySource, EventRecord, FieldChange, HistoryEntry, MutationType,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a recorded mutation.
#[derive(Clone, Debug)]
pub struct WriteReceipt {
    /// The new snapshot; pass it as `latest` for the next mutation.
    pub entry: HistoryEntry,
    pub event: EventRecord,
}

impl WriteReceipt {
    pub fn content_id(&self) -> &ContentId {
        &self.entry.content_id
    }

    pub fn version(&self) -> u64 {
        self.entry.version()
    }
}

/// Records mutations as snapshots.
pub struct HistoryWriter {
    content: Arc<ContentStoreClient>,
    log: Arc<dyn EventLog>,
    subscriptions: Option<Arc<SubscriptionManager>>,
}

impl HistoryWriter {
    pub fn new(content: Arc<ContentStoreClient>, log: Arc<dyn EventLog>) -> Self {
        Self {
            content,
            log,
            subscriptions: None,
        }
    }

    pub fn with_subscriptions(mut self, subscriptions: Arc<SubscriptionManager>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    /// Record a mutation on top of `latest` (None for a new entity).
    pub async fn record(
        &self,
        entity_id: &EntityId,
        mutation: MutationType,
        changes: Vec<FieldChange>,
        latest: Option<&HistoryEntry>,
    ) -> Result<WriteReceipt> {
        self.record_at(entity_id, mutation, changes, latest, Utc::now()).await
    }

    /// Like [`record`](Self::record) with an explicit timestamp.
    ///
    /// If the blob is stored but the log rejects the event, the returned
    /// `AppendRejected` carries the stored identifier; pass it to
    /// [`retry_append`](Self::retry_append) instead of recording again.
    pub async fn record_at(
        &self,
        entity_id: &EntityId,
        mutation: MutationType,
        changes: Vec<FieldChange>,
        latest: Option<&HistoryEntry>,
        at: DateTime<Utc>,
    ) -> Result<WriteReceipt> {
        let built = build_snapshot(mutation, changes, latest, at)?;
        let version = built.version();
        let content_id = self.content.put(&built.blob).await?;

        let event = match self.log.append(entity_id, &content_id).await {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    entity = %entity_id,
                    version,
                    content_id = %content_id,
                    error = %e,
                    "event append failed"
                );
                self.notify(HistoryEvent::AppendFailed {
                    entity_id: entity_id.clone(),
                    version,
                    content_id: content_id.clone(),
                    reason: e.to_string(),
                });
                return Err(match e {
                    rejected @ HistoryError::AppendRejected { .. } => rejected,
                    other => HistoryError::AppendRejected {
                        entity_id: entity_id.clone(),
                        content_id,
                        reason: other.to_string(),
                    },
                });
            }
        };

        info!(
            entity = %entity_id,
            version,
            content_id = %content_id,
            mutation = ?mutation,
            "recorded snapshot"
        );
        self.notify(HistoryEvent::SnapshotRecorded {
            entity_id: entity_id.clone(),
            version,
            content_id: content_id.clone(),
            sequence_index: event.sequence_index,
        });

        Ok(WriteReceipt {
            entry: HistoryEntry::new(content_id, built.snapshot, EntrySource::Fetched),
            event,
        })
    }

    /// Append an event for a blob that is already stored.
    pub async fn retry_append(
        &self,
        entity_id: &EntityId,
        content_id: &ContentId,
    ) -> Result<EventRecord> {
        self.log.append(entity_id, content_id).await
    }

    fn notify(&self, event: HistoryEvent) {
        if let Some(subscriptions) = &self.subscriptions {
            subscriptions.publish(event);
        }
    }
}
