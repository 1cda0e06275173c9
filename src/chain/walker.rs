//! Chain walker.

use super::ResolvedCache;
use crate::content::ContentStoreClient;
use crate::error::Result;
use crate::types::{ContentId, EntityId, EntrySource, HistoryEntry, VersionSnapshot};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a walk stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WalkStop {
    /// Collected the requested number of snapshots.
    TargetReached,
    /// Reached version 0.
    ReachedGenesis,
    /// A predecessor could not be resolved or did not fit the chain.
    BrokenLink {
        content_id: ContentId,
        expected_version: u64,
        reason: String,
    },
}

/// Snapshots collected by a walk, newest first, excluding the start.
#[derive(Clone, Debug)]
pub struct WalkOutcome {
    pub entries: Vec<HistoryEntry>,
    pub stop: WalkStop,
}

impl WalkOutcome {
    /// False when the walk hit a broken link; history may be incomplete.
    pub fn is_complete(&self) -> bool {
        !matches!(self.stop, WalkStop::BrokenLink { .. })
    }
}

/// Follows `previous_version` pointers through the content store.
pub struct ChainWalker {
    content: Arc<ContentStoreClient>,
    cache: Arc<ResolvedCache>,
}

impl ChainWalker {
    pub fn new(content: Arc<ContentStoreClient>, cache: Arc<ResolvedCache>) -> Self {
        Self { content, cache }
    }

    /// Collect up to `target_count` predecessors of `start`.
    ///
    /// Stops early at version 0, or at the first link that cannot be
    /// resolved; what was collected so far is returned either way.
    pub async fn walk_backward(
        &self,
        entity_id: &EntityId,
        start: &HistoryEntry,
        target_count: usize,
    ) -> WalkOutcome {
        let mut entries: Vec<HistoryEntry> = Vec::new();
        let mut prefetched: HashMap<ContentId, Result<VersionSnapshot>> = HashMap::new();
        let mut current = start.snapshot.clone();

        while entries.len() < target_count {
            if current.previous_version.is_empty() {
                return WalkOutcome {
                    entries,
                    stop: WalkStop::ReachedGenesis,
                };
            }

            let pointer = current.previous_version.clone();
            let expected_version = match current.version.checked_sub(1) {
                Some(v) => v,
                None => {
                    return Self::broken(entries, pointer, 0, "version 0 has a predecessor pointer")
                }
            };

            check_shortcut(&current, &pointer, expected_version);

            let entry = match self.cached(entity_id, expected_version, &pointer) {
                Some(entry) => entry,
                None => {
                    if !prefetched.contains_key(&pointer) && target_count - entries.len() > 1 {
                        self.prefetch(entity_id, &current, &mut prefetched).await;
                    }

                    // A failed prefetch of the pointer already ran the full fallback
                    let resolved = match prefetched.remove(&pointer) {
                        Some(result) => result,
                        None => self.content.resolve(&pointer).await,
                    };

                    match resolved {
                        Ok(snapshot) => {
                            HistoryEntry::new(pointer.clone(), snapshot, EntrySource::Fetched)
                        }
                        Err(e) => {
                            warn!(
                                entity = %entity_id,
                                content_id = %pointer,
                                expected_version,
                                error = %e,
                                "chain link unresolvable, history truncated"
                            );
                            return Self::broken(entries, pointer, expected_version, e.to_string());
                        }
                    }
                }
            };

            if entry.version() != expected_version {
                warn!(
                    entity = %entity_id,
                    content_id = %pointer,
                    expected_version,
                    got = entry.version(),
                    "chain link has unexpected version"
                );
                let reason = format!("resolved version {}", entry.version());
                return Self::broken(entries, pointer, expected_version, reason);
            }

            self.cache.insert(entity_id, &entry);
            current = entry.snapshot.clone();
            entries.push(entry);
        }

        debug!(entity = %entity_id, collected = entries.len(), "walk reached target");
        WalkOutcome {
            entries,
            stop: WalkStop::TargetReached,
        }
    }

    fn cached(
        &self,
        entity_id: &EntityId,
        version: u64,
        pointer: &ContentId,
    ) -> Option<HistoryEntry> {
        self.cache
            .get(entity_id, version)
            .filter(|entry| &entry.content_id == pointer)
    }

    /// Resolve the shortcut entries of `current` concurrently.
    ///
    /// Results, failures included, only land in `prefetched`, keyed by
    /// identifier; they are used when, and only when, the pointer chain names
    /// that identifier.
    async fn prefetch(
        &self,
        entity_id: &EntityId,
        current: &VersionSnapshot,
        prefetched: &mut HashMap<ContentId, Result<VersionSnapshot>>,
    ) {
        let wanted: Vec<&ContentId> = current
            .recent_versions
            .iter()
            .filter(|r| self.cache.get(entity_id, r.version).is_none())
            .map(|r| &r.content_identifier)
            .filter(|id| !id.is_empty() && !prefetched.contains_key(*id))
            .collect();

        if wanted.is_empty() {
            return;
        }

        let results = join_all(wanted.iter().map(|id| self.content.resolve(id))).await;
        for (id, result) in wanted.into_iter().zip(results) {
            prefetched.insert(id.clone(), result);
        }
    }

    fn broken(
        entries: Vec<HistoryEntry>,
        content_id: ContentId,
        expected_version: u64,
        reason: impl Into<String>,
    ) -> WalkOutcome {
        WalkOutcome {
            entries,
            stop: WalkStop::BrokenLink {
                content_id,
                expected_version,
                reason: reason.into(),
            },
        }
    }
}

fn check_shortcut(current: &VersionSnapshot, pointer: &ContentId, expected_version: u64) {
    if let Some(head) = current.recent_versions.first() {
        if head.version != expected_version || &head.content_identifier != pointer {
            warn!(
                version = current.version,
                shortcut_version = head.version,
                shortcut = %head.content_identifier,
                pointer = %pointer,
                "recent_versions shortcut diverges from pointer chain, following pointer"
            );
        }
    }
}

/// Merge freshly walked entries into a known set.
///
/// Entries are keyed by version; a version already known is kept and the
/// fresh duplicate dropped. The result is sorted newest first.
pub fn merge_entries(
    known: &[HistoryEntry],
    fresh: impl IntoIterator<Item = HistoryEntry>,
) -> Vec<HistoryEntry> {
    let mut merged: BTreeMap<u64, HistoryEntry> = known
        .iter()
        .map(|entry| (entry.version(), entry.clone()))
        .collect();

    for entry in fresh {
        merged.entry(entry.version()).or_insert(entry);
    }

    merged.into_values().rev().collect()
}
