//! Append-only event log anchoring snapshots to entities.
//!
//! The log is the discovery index: it records which content identifiers were
//! written for an entity and in which order. It is treated as eventually
//! consistent, so a just-appended event may not show up in the next query.

mod log;
mod memory;

pub use log::FileEventLog;
pub use memory::MemoryEventLog;

use crate::error::{HistoryError, Result};
use crate::types::{ContentId, EntityId, EventRecord};
use async_trait::async_trait;

/// One page of events, newest first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventPage {
    pub events: Vec<EventRecord>,
    pub total_pages: u32,
    pub total_items: u64,
}

/// Append/query interface over an external, externally ordered log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event. Fails with `AppendRejected` if the log refuses it.
    async fn append(&self, entity_id: &EntityId, content_id: &ContentId) -> Result<EventRecord>;

    /// Events for `entity_id`, newest first, 1-indexed pages.
    ///
    /// A page beyond `total_pages` is empty rather than an error.
    async fn query_page(
        &self,
        entity_id: &EntityId,
        page: u32,
        page_size: u32,
    ) -> Result<EventPage>;
}

/// Slice an oldest-first event list into a newest-first page.
pub(crate) fn paginate(events: &[EventRecord], page: u32, page_size: u32) -> Result<EventPage> {
    if page == 0 || page_size == 0 {
        return Err(HistoryError::InvalidArgument(format!(
            "page {} / page size {} must both be at least 1",
            page, page_size
        )));
    }

    let total_items = events.len() as u64;
    let total_pages = total_items.div_ceil(page_size as u64) as u32;
    let skip = (page as usize - 1).saturating_mul(page_size as usize);

    let events = events
        .iter()
        .rev()
        .skip(skip)
        .take(page_size as usize)
        .cloned()
        .collect();

    Ok(EventPage {
        events,
        total_pages,
        total_items,
    })
}
