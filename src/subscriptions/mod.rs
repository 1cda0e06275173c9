//! In-process notifications about recorded history.
//!
//! The write path publishes a [`HistoryEvent`] after each snapshot it
//! records (or fails to anchor). Readers holding a session for the entity can
//! use it to invalidate their pages.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new();
//! let handle = manager.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::entities(vec![EntityId::new("manga-42")]),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         HistoryEvent::SnapshotRecorded { version, .. } => println!("v{}", version),
//!         HistoryEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, HistoryEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
