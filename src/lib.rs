//! # Catalog History
//!
//! Content-addressed edit history for catalog entities (manga and their
//! chapters). Every mutation produces an immutable, self-describing
//! snapshot that points back at its predecessor, forming a per-entity
//! version chain that can be paged through newest first.
//!
//! ## Core Concepts
//!
//! - **Snapshots**: Deterministically encoded versions with a change log and a backward pointer
//! - **Content store**: Write backends and read gateways tried in order, with a per-attempt timeout
//! - **Event log**: Append-only, eventually consistent index of identifiers per entity
//! - **Chain walking**: Pointer traversal that recovers history the log does not show
//! - **Sessions**: Per-entity pagination with cancellation of superseded requests
//!
//! ## Example
//!
//! ```ignore
//! use catalog_history::{HistoryConfig, HistoryService, HistoryWriter, EntityId, MutationType};
//!
//! let config = HistoryConfig::from_env()?;
//! let content = Arc::new(ContentStoreClient::from_config(&config)?);
//! let log: Arc<dyn EventLog> = Arc::new(FileEventLog::open("./events")?);
//!
//! let writer = HistoryWriter::new(content.clone(), log.clone());
//! let manga = EntityId::new("manga-42");
//! let receipt = writer.record(&manga, MutationType::Create, vec![], None).await?;
//!
//! let service = HistoryService::new(content, log, &config);
//! let page = service.load_page(&manga, 1, config.default_page_size).await?;
//! ```

pub mod chain;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod pagination;
pub mod snapshot;
pub mod subscriptions;
pub mod types;
pub mod writer;

// Re-exports
pub use chain::{merge_entries, ChainWalker, ResolvedCache, WalkOutcome, WalkStop};
pub use config::{HistoryConfig, PublisherConfig};
pub use content::{
    ContentStoreClient, FsBlobStore, Gateway, HttpGateway, HttpPublisher, MemoryBlobStore,
    Publisher,
};
pub use error::{AttemptError, HistoryError, Result};
pub use events::{EventLog, EventPage, FileEventLog, MemoryEventLog};
pub use pagination::{HistoryService, HistorySession, SessionState};
pub use snapshot::{build_snapshot, diff_fields, BuiltSnapshot};
pub use subscriptions::{
    DropReason, HistoryEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
pub use writer::{HistoryWriter, WriteReceipt};
