//! In-process content store.

use super::{Gateway, Publisher};
use crate::error::AttemptError;
use crate::types::ContentId;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    blobs: Mutex<HashMap<ContentId, Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    corrupt_reads: AtomicBool,
    latency: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
}

/// Content-addressed map acting as both gateway and publisher.
///
/// Identifiers are SHA-256 of the blob. Failure, corruption and latency can
/// be injected to exercise the fallback paths.
#[derive(Clone)]
pub struct MemoryBlobStore {
    name: String,
    inner: Arc<Inner>,
}

impl MemoryBlobStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Inner::default()),
        }
    }

    /// Insert a blob directly, bypassing failure injection.
    pub fn insert(&self, blob: &[u8]) -> ContentId {
        let id = ContentId::from_bytes(blob);
        self.inner.blobs.lock().insert(id.clone(), blob.to_vec());
        id
    }

    /// Store raw bytes under an arbitrary identifier.
    pub fn insert_raw(&self, id: ContentId, bytes: Vec<u8>) {
        self.inner.blobs.lock().insert(id, bytes);
    }

    pub fn remove(&self, id: &ContentId) -> bool {
        self.inner.blobs.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.inner.blobs.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetch calls served (including failed ones).
    pub fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Serve a non-snapshot body on every read.
    pub fn set_corrupt_reads(&self, corrupt: bool) {
        self.inner.corrupt_reads.store(corrupt, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.inner.latency.lock() = latency;
    }

    async fn delay(&self) {
        let latency = *self.inner.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Gateway for MemoryBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, content_id: &ContentId) -> Result<Vec<u8>, AttemptError> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;

        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(AttemptError::Transport(format!("{} unreachable", self.name)));
        }
        if self.inner.corrupt_reads.load(Ordering::SeqCst) {
            return Ok(b"<html>502 Bad Gateway</html>".to_vec());
        }

        self.inner
            .blobs
            .lock()
            .get(content_id)
            .cloned()
            .ok_or(AttemptError::Status(404))
    }
}

#[async_trait]
impl Publisher for MemoryBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, blob: &[u8]) -> Result<ContentId, AttemptError> {
        self.delay().await;

        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(AttemptError::Transport(format!("{} unreachable", self.name)));
        }

        Ok(self.insert(blob))
    }
}
