//! Subscription manager for broadcasting history events.

use super::types::{
    DropReason, HistoryEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<HistoryEvent>,
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            // Best effort
            let _ = sub.sender.try_send(HistoryEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver `event` to every matching subscriber.
    ///
    /// Subscribers whose buffer is full or whose receiver is gone are removed.
    pub fn publish(&self, event: HistoryEvent) {
        let mut dropped = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.config.filter.matches(&event) {
                    continue;
                }
                match sub.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        dropped.push(*id)
                    }
                }
            }
        }

        if dropped.is_empty() {
            return;
        }

        let mut subs = self.subscriptions.write();
        for id in dropped {
            if let Some(sub) = subs.remove(&id) {
                debug!(subscription = id.0, "dropping slow subscriber");
                let _ = sub.sender.try_send(HistoryEvent::Dropped {
                    reason: DropReason::SlowConsumer,
                });
            }
        }
    }
}
