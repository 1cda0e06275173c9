//! Resolved-entry cache.

use crate::types::{ContentId, EntityId, EntrySource, HistoryEntry, VersionSnapshot};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Cache of resolved snapshots keyed by `(entity, version)`.
///
/// Snapshots are immutable, so the first correctly resolved value for a key
/// is kept and later inserts for the same key are ignored. Entries live until
/// their entity is released with [`ResolvedCache::remove_entity`].
#[derive(Default)]
pub struct ResolvedCache {
    by_version: RwLock<HashMap<(EntityId, u64), (ContentId, VersionSnapshot)>>,
    by_content: RwLock<HashMap<(EntityId, ContentId), u64>>,
}

impl ResolvedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resolved entry. Returns false if the key was already present.
    pub fn insert(&self, entity_id: &EntityId, entry: &HistoryEntry) -> bool {
        let key = (entity_id.clone(), entry.version());
        {
            let mut by_version = self.by_version.write();
            if by_version.contains_key(&key) {
                return false;
            }
            by_version.insert(key.clone(), (entry.content_id.clone(), entry.snapshot.clone()));
        }
        self.by_content
            .write()
            .insert((key.0, entry.content_id.clone()), key.1);
        true
    }

    pub fn get(&self, entity_id: &EntityId, version: u64) -> Option<HistoryEntry> {
        self.by_version
            .read()
            .get(&(entity_id.clone(), version))
            .map(|(id, snapshot)| {
                HistoryEntry::new(id.clone(), snapshot.clone(), EntrySource::Cached)
            })
    }

    /// Look up by the identifier a snapshot was resolved from.
    pub fn get_by_content(
        &self,
        entity_id: &EntityId,
        content_id: &ContentId,
    ) -> Option<HistoryEntry> {
        let version = *self
            .by_content
            .read()
            .get(&(entity_id.clone(), content_id.clone()))?;
        self.get(entity_id, version)
            .filter(|entry| &entry.content_id == content_id)
    }

    /// Drop every entry of `entity_id`. Returns how many were removed.
    pub fn remove_entity(&self, entity_id: &EntityId) -> usize {
        let mut by_version = self.by_version.write();
        let before = by_version.len();
        by_version.retain(|(entity, _), _| entity != entity_id);
        self.by_content
            .write()
            .retain(|(entity, _), _| entity != entity_id);
        before - by_version.len()
    }

    pub fn len(&self) -> usize {
        self.by_version.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
