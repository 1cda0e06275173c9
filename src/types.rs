//! Core types for the history subsystem.

use crate::error::{HistoryError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum number of entries carried in `recent_versions`.
pub const MAX_RECENT_VERSIONS: usize = 3;

/// Largest version a snapshot may carry. Readers parse versions as JSON
/// numbers, so it stays within the exactly representable integers.
pub const MAX_VERSION: u64 = (1 << 53) - 1;

/// Opaque content identifier of an immutable blob.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ContentId(pub String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        ContentId(id.into())
    }

    /// Derive an identifier from content (SHA-256, hex).
    ///
    /// Used by the local backends; remote stores assign their own ids.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentId(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(12).collect();
        write!(f, "ContentId({})", short)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a catalog entity (manga record) whose history is tracked.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of mutation a snapshot records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    Create,
    Update,
    Delete,
    Publish,
    Unpublish,
    CategoryChange,
    ChapterCreate,
    ChapterUpdate,
    ChapterDelete,
    ImageRemove,
}

impl MutationType {
    /// Human-readable label, used as the change log description.
    pub fn label(self) -> &'static str {
        match self {
            MutationType::Create => "Manga created",
            MutationType::Update => "Manga updated",
            MutationType::Delete => "Manga deleted",
            MutationType::Publish => "Manga published",
            MutationType::Unpublish => "Manga unpublished",
            MutationType::CategoryChange => "Categories changed",
            MutationType::ChapterCreate => "Chapter created",
            MutationType::ChapterUpdate => "Chapter updated",
            MutationType::ChapterDelete => "Chapter deleted",
            MutationType::ImageRemove => "Image removed",
        }
    }

    /// Structural events may carry an empty change list.
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            MutationType::Create
                | MutationType::Delete
                | MutationType::Publish
                | MutationType::Unpublish
        )
    }
}

/// A single field-level diff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

impl FieldChange {
    pub fn new(
        field: impl Into<String>,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }
}

/// Change log carried by every snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeLog {
    /// ISO-8601 timestamp.
    pub timestamp: String,
    pub description: String,
    pub changes: Vec<FieldChange>,
}

/// Shortcut pointer to a recent ancestor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentVersion {
    pub version: u64,
    pub content_identifier: ContentId,
}

/// One immutable recorded state of an entity's edit history.
///
/// Field order is the serialization order; it must stay fixed because the
/// content identifier is derived from the serialized bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    pub version: u64,
    pub content: String,
    #[serde(rename = "type")]
    pub mutation: MutationType,
    pub change_log: ChangeLog,
    pub recent_versions: Vec<RecentVersion>,
    /// Empty for version 0.
    pub previous_version: ContentId,
}

impl VersionSnapshot {
    /// Serialize to the canonical blob.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a blob and check the structural invariants.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: VersionSnapshot = serde_json::from_slice(bytes)
            .map_err(|e| HistoryError::MalformedSnapshot(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check the invariants every stored snapshot must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.version > MAX_VERSION {
            return Err(HistoryError::MalformedSnapshot(format!(
                "version {} exceeds {}",
                self.version, MAX_VERSION
            )));
        }

        if self.is_genesis() != self.previous_version.is_empty() {
            return Err(HistoryError::MalformedSnapshot(format!(
                "version {} has previous pointer {:?}",
                self.version, self.previous_version
            )));
        }

        if self.recent_versions.len() > MAX_RECENT_VERSIONS {
            return Err(HistoryError::MalformedSnapshot(format!(
                "{} recent versions (max {})",
                self.recent_versions.len(),
                MAX_RECENT_VERSIONS
            )));
        }

        let mut bound = self.version;
        for recent in &self.recent_versions {
            if recent.version >= bound {
                return Err(HistoryError::MalformedSnapshot(format!(
                    "recent version {} not below {}",
                    recent.version, bound
                )));
            }
            bound = recent.version;
        }

        Ok(())
    }

    pub fn is_genesis(&self) -> bool {
        self.version == 0
    }
}

/// A record in the append-only event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub entity_id: EntityId,
    pub content_identifier: ContentId,
    /// Assigned by the log.
    pub sequence_index: u64,
    /// Unix milliseconds, assigned by the log.
    pub timestamp: i64,
}

/// How a history entry was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntrySource {
    /// Fetched from a gateway for this request.
    Fetched,
    /// Served from the resolved-entry cache.
    Cached,
}

/// A resolved snapshot plus the identifier it was resolved from.
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub content_id: ContentId,
    pub snapshot: VersionSnapshot,
    pub source: EntrySource,
}

impl HistoryEntry {
    pub fn new(content_id: ContentId, snapshot: VersionSnapshot, source: EntrySource) -> Self {
        Self {
            content_id,
            snapshot,
            source,
        }
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version
    }
}

/// Pagination view recomputed whenever the known chain length changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PaginationState {
    pub current_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub has_more: bool,
}

impl PaginationState {
    pub fn compute(current_page: u32, page_size: u32, total_items: u64) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            u32::try_from(total_items.div_ceil(page_size as u64)).unwrap_or(u32::MAX)
        };
        Self {
            current_page,
            total_pages,
            total_items,
            has_more: current_page < total_pages,
        }
    }
}

/// Whether every entry needed for a view could be resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    /// Some versions are unreachable; history may be incomplete.
    Partial { reason: String },
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

/// One page of resolved history.
#[derive(Clone, Debug)]
pub struct PageView {
    /// Sorted by version, newest first.
    pub entries: Vec<HistoryEntry>,
    pub pagination: PaginationState,
    pub completeness: Completeness,
    /// Identifiers that could not be resolved.
    pub unreachable: Vec<ContentId>,
}
