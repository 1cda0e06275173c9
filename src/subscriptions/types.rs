//! Subscription types.

use crate::types::{ContentId, EntityId};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    /// Default: 256
    pub buffer_size: usize,

    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Which events a subscriber receives.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Restrict to these entities (None = all).
    pub entities: Option<Vec<EntityId>>,

    /// Also deliver `AppendFailed` events.
    pub include_failures: bool,
}

impl SubscriptionFilter {
    pub fn entities(entities: Vec<EntityId>) -> Self {
        Self {
            entities: Some(entities),
            include_failures: false,
        }
    }

    pub fn with_failures(mut self) -> Self {
        self.include_failures = true;
        self
    }

    pub(crate) fn matches(&self, event: &HistoryEvent) -> bool {
        let entity = match event {
            HistoryEvent::SnapshotRecorded { entity_id, .. } => entity_id,
            HistoryEvent::AppendFailed { entity_id, .. } => {
                if !self.include_failures {
                    return false;
                }
                entity_id
            }
            HistoryEvent::Dropped { .. } => return true,
        };

        match &self.entities {
            Some(entities) => entities.contains(entity),
            None => true,
        }
    }
}

/// Unique subscription identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Why a subscription ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Buffer filled up.
    SlowConsumer,
    Unsubscribed,
}

/// Event delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryEvent {
    /// A snapshot was stored and anchored in the event log.
    SnapshotRecorded {
        entity_id: EntityId,
        version: u64,
        content_id: ContentId,
        sequence_index: u64,
    },
    /// A snapshot was stored but the log rejected its event.
    AppendFailed {
        entity_id: EntityId,
        version: u64,
        content_id: ContentId,
        reason: String,
    },
    /// Final event of a subscription.
    Dropped { reason: DropReason },
}

/// Receiving end of a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub(crate) receiver: Receiver<HistoryEvent>,
}

impl SubscriptionHandle {
    /// Block until an event arrives.
    pub fn recv(&self) -> Result<HistoryEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    pub fn try_recv(&self) -> Result<HistoryEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<HistoryEvent, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
