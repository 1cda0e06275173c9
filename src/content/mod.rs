//! Content-addressed snapshot storage.
//!
//! Writes go to an ordered list of [`Publisher`]s, reads to an ordered list
//! of [`Gateway`]s. The [`ContentStoreClient`] walks each list as an explicit
//! fallback loop with a per-attempt timeout; individual endpoint failures are
//! logged and never surface on their own.

mod client;
mod fs;
mod http;
mod memory;

pub use client::{AttemptOutcome, ContentStoreClient};
pub use fs::FsBlobStore;
pub use http::{HttpGateway, HttpPublisher};
pub use memory::MemoryBlobStore;

use crate::error::AttemptError;
use crate::types::ContentId;
use async_trait::async_trait;

/// A retrieval endpoint.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetch the raw blob stored under `content_id`.
    async fn fetch(&self, content_id: &ContentId) -> std::result::Result<Vec<u8>, AttemptError>;
}

/// A write backend.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Store `blob`, returning the identifier the backend assigned.
    async fn publish(&self, blob: &[u8]) -> std::result::Result<ContentId, AttemptError>;
}
