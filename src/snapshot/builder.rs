//! Snapshot builder.

use crate::error::{HistoryError, Result};
use crate::types::{
    ChangeLog, FieldChange, HistoryEntry, MutationType, RecentVersion, VersionSnapshot,
    MAX_RECENT_VERSIONS, MAX_VERSION,
};
use chrono::{DateTime, SecondsFormat, Utc};

/// Output of [`build_snapshot`].
#[derive(Clone, Debug)]
pub struct BuiltSnapshot {
    pub snapshot: VersionSnapshot,
    /// Canonical serialized form, ready for the content store.
    pub blob: Vec<u8>,
}

impl BuiltSnapshot {
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }
}

/// ISO-8601 with millisecond precision and a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the next snapshot of a lineage.
///
/// `latest` is the newest snapshot the caller knows of, together with the
/// identifier it is stored under. Without one the result is version 0.
pub fn build_snapshot(
    mutation: MutationType,
    changes: Vec<FieldChange>,
    latest: Option<&HistoryEntry>,
    at: DateTime<Utc>,
) -> Result<BuiltSnapshot> {
    if changes.is_empty() && !mutation.is_structural() {
        return Err(HistoryError::InvalidArgument(format!(
            "{:?} requires at least one field change",
            mutation
        )));
    }

    let (version, recent_versions, previous_version) = match latest {
        None => (0, Vec::new(), Default::default()),
        Some(prev) => {
            if prev.content_id.is_empty() {
                return Err(HistoryError::InvalidArgument(
                    "latest snapshot has no content identifier".into(),
                ));
            }

            let version = prev
                .snapshot
                .version
                .checked_add(1)
                .filter(|next| *next <= MAX_VERSION)
                .ok_or_else(|| {
                    HistoryError::InvalidArgument(format!(
                        "no version follows {}",
                        prev.snapshot.version
                    ))
                })?;

            let mut recent = Vec::with_capacity(MAX_RECENT_VERSIONS);
            recent.push(RecentVersion {
                version: prev.snapshot.version,
                content_identifier: prev.content_id.clone(),
            });
            recent.extend(
                prev.snapshot
                    .recent_versions
                    .iter()
                    .take(MAX_RECENT_VERSIONS - 1)
                    .cloned(),
            );

            (version, recent, prev.content_id.clone())
        }
    };

    let snapshot = VersionSnapshot {
        version,
        content: format!("{} (v{})", mutation.label(), version),
        mutation,
        change_log: ChangeLog {
            timestamp: format_timestamp(at),
            description: mutation.label().to_string(),
            changes,
        },
        recent_versions,
        previous_version,
    };

    let blob = snapshot.encode()?;
    Ok(BuiltSnapshot { snapshot, blob })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentId, EntrySource};
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn title_change() -> Vec<FieldChange> {
        vec![FieldChange::new("title", json!("Old"), json!("New"))]
    }

    fn entry(built: &BuiltSnapshot) -> HistoryEntry {
        HistoryEntry::new(
            ContentId::from_bytes(&built.blob),
            built.snapshot.clone(),
            EntrySource::Fetched,
        )
    }

    #[test]
    fn test_first_snapshot_is_genesis() {
        let built = build_snapshot(MutationType::Create, vec![], None, at()).unwrap();
        assert_eq!(built.version(), 0);
        assert!(built.snapshot.previous_version.is_empty());
        assert!(built.snapshot.recent_versions.is_empty());
        assert_eq!(built.snapshot.change_log.timestamp, "2024-03-01T12:00:00.000Z");

        let decoded = VersionSnapshot::decode(&built.blob).unwrap();
        assert!(decoded.previous_version.is_empty());
    }

    #[test]
    fn test_next_snapshot_links_to_previous() {
        let genesis = build_snapshot(MutationType::Create, vec![], None, at()).unwrap();
        let genesis = entry(&genesis);

        let next =
            build_snapshot(MutationType::Update, title_change(), Some(&genesis), at()).unwrap();
        assert_eq!(next.version(), 1);
        assert_eq!(next.snapshot.previous_version, genesis.content_id);
        assert_eq!(
            next.snapshot.recent_versions,
            vec![RecentVersion {
                version: 0,
                content_identifier: genesis.content_id.clone(),
            }]
        );
    }

    #[test]
    fn test_recent_versions_truncate_to_three() {
        let mut latest = build_snapshot(MutationType::Create, vec![], None, at()).unwrap();
        latest.snapshot.version = 6;
        latest.snapshot.previous_version = ContentId::new("cidF");
        latest.snapshot.recent_versions = vec![
            RecentVersion {
                version: 5,
                content_identifier: ContentId::new("cidE"),
            },
            RecentVersion {
                version: 4,
                content_identifier: ContentId::new("cidD"),
            },
            RecentVersion {
                version: 3,
                content_identifier: ContentId::new("cidC"),
            },
        ];
        let latest =
            HistoryEntry::new(ContentId::new("cidG"), latest.snapshot, EntrySource::Fetched);

        let next =
            build_snapshot(MutationType::Update, title_change(), Some(&latest), at()).unwrap();
        assert_eq!(next.version(), 7);
        assert_eq!(next.snapshot.previous_version, ContentId::new("cidG"));
        let recent: Vec<_> = next
            .snapshot
            .recent_versions
            .iter()
            .map(|r| (r.version, r.content_identifier.as_str().to_string()))
            .collect();
        assert_eq!(
            recent,
            vec![(6, "cidG".to_string()), (5, "cidE".to_string()), (4, "cidD".to_string())]
        );
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = build_snapshot(MutationType::Update, title_change(), None, at());
        let b = build_snapshot(MutationType::Update, title_change(), None, at());
        assert_eq!(a.unwrap().blob, b.unwrap().blob);
    }

    #[test]
    fn test_no_version_after_the_last() {
        let mut latest = build_snapshot(MutationType::Create, vec![], None, at()).unwrap();
        latest.snapshot.previous_version = ContentId::new("cidPrev");

        for last in [MAX_VERSION, u64::MAX] {
            latest.snapshot.version = last;
            let entry = HistoryEntry::new(
                ContentId::new("cidLast"),
                latest.snapshot.clone(),
                EntrySource::Fetched,
            );
            let result = build_snapshot(MutationType::Update, title_change(), Some(&entry), at());
            assert!(matches!(result, Err(HistoryError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_update_without_changes_is_rejected() {
        let result = build_snapshot(MutationType::Update, vec![], None, at());
        assert!(matches!(result, Err(HistoryError::InvalidArgument(_))));
    }
}
