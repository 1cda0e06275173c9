//! Error handling and degraded-backend tests.

use catalog_history::{
    Completeness, ContentId, ContentStoreClient, EntityId, FieldChange, Gateway, HistoryConfig,
    HistoryEntry, HistoryError, HistoryService, HistoryWriter, MemoryBlobStore, MemoryEventLog,
    MutationType, Publisher, SessionState, VersionSnapshot, WriteReceipt,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn client_over(
    gateways: &[&MemoryBlobStore],
    publisher: &MemoryBlobStore,
    timeout: Duration,
) -> Arc<ContentStoreClient> {
    Arc::new(ContentStoreClient::new(
        gateways
            .iter()
            .map(|g| Arc::new((*g).clone()) as Arc<dyn Gateway>)
            .collect(),
        vec![Arc::new(publisher.clone()) as Arc<dyn Publisher>],
        timeout,
        64,
    ))
}

fn client(store: &MemoryBlobStore) -> Arc<ContentStoreClient> {
    client_over(&[store], store, Duration::from_secs(1))
}

async fn record_edits(writer: &HistoryWriter, entity: &EntityId, count: u64) -> Vec<WriteReceipt> {
    let mut receipts: Vec<WriteReceipt> = Vec::new();
    for i in 0..count {
        let (mutation, changes) = if i == 0 {
            (MutationType::Create, vec![])
        } else {
            (
                MutationType::ChapterUpdate,
                vec![FieldChange::new("pages", json!(i), json!(i + 1))],
            )
        };
        let latest = receipts.last().map(|r| &r.entry);
        receipts.push(writer.record(entity, mutation, changes, latest).await.unwrap());
    }
    receipts
}

/// A store holding `count` snapshots for `entity`, with every event visible.
async fn seeded(
    entity: &EntityId,
    count: u64,
) -> (MemoryBlobStore, Arc<MemoryEventLog>, Vec<WriteReceipt>) {
    let store = MemoryBlobStore::new("store");
    let log = Arc::new(MemoryEventLog::new());
    let writer = HistoryWriter::new(client(&store), log.clone());
    let receipts = record_edits(&writer, entity, count).await;
    (store, log, receipts)
}

fn versions(entries: &[HistoryEntry]) -> Vec<u64> {
    entries.iter().map(HistoryEntry::version).collect()
}

// --- Gateway fallback ---

#[tokio::test]
async fn test_third_gateway_serves_after_two_failures() {
    let entity = EntityId::new("manga-1");
    let (store, _log, receipts) = seeded(&entity, 1).await;

    let down_a = MemoryBlobStore::new("down-a");
    let down_b = MemoryBlobStore::new("down-b");
    down_a.set_fail_reads(true);
    down_b.set_fail_reads(true);

    let reader = client_over(&[&down_a, &down_b, &store], &store, Duration::from_secs(1));
    let snapshot = reader.resolve(receipts[0].content_id()).await.unwrap();

    assert_eq!(snapshot.version, 0);
    assert_eq!(down_a.fetch_count(), 1);
    assert_eq!(down_b.fetch_count(), 1);
}

#[tokio::test]
async fn test_all_gateways_failing_is_content_unavailable() {
    let store = MemoryBlobStore::new("store");
    let other = MemoryBlobStore::new("other");
    store.set_fail_reads(true);
    other.set_fail_reads(true);

    let reader = client_over(&[&store, &other], &store, Duration::from_secs(1));
    match reader.resolve(&ContentId::new("missing")).await {
        Err(HistoryError::ContentUnavailable { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_blob_is_content_unavailable() {
    let store = MemoryBlobStore::new("store");
    let result = client(&store).get(&ContentId::new("absent")).await;
    assert!(matches!(result, Err(HistoryError::ContentUnavailable { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_slow_gateway_times_out_and_falls_back() {
    let entity = EntityId::new("manga-1");
    let (store, _log, receipts) = seeded(&entity, 1).await;

    let slow = MemoryBlobStore::new("slow");
    slow.insert_raw(
        receipts[0].content_id().clone(),
        receipts[0].entry.snapshot.encode().unwrap(),
    );
    slow.set_latency(Some(Duration::from_secs(30)));

    let reader = client_over(&[&slow, &store], &store, Duration::from_secs(2));
    let snapshot = reader.resolve(receipts[0].content_id()).await.unwrap();
    assert_eq!(snapshot, receipts[0].entry.snapshot);
    assert_eq!(store.fetch_count(), 1);
}

#[tokio::test]
async fn test_malformed_body_falls_back() {
    let entity = EntityId::new("manga-1");
    let (store, _log, receipts) = seeded(&entity, 1).await;

    let broken = MemoryBlobStore::new("broken");
    broken.set_corrupt_reads(true);

    let reader = client_over(&[&broken, &store], &store, Duration::from_secs(1));
    let bytes = reader.get(receipts[0].content_id()).await.unwrap();
    assert!(VersionSnapshot::decode(&bytes).is_ok());
    assert_eq!(broken.fetch_count(), 1);
}

#[tokio::test]
async fn test_empty_identifier_is_rejected_without_fetching() {
    let store = MemoryBlobStore::new("store");
    match client(&store).resolve(&ContentId::default()).await {
        Err(HistoryError::ContentUnavailable { attempts, .. }) => assert_eq!(attempts, 0),
        other => panic!("unexpected result: {:?}", other),
    }
    assert_eq!(store.fetch_count(), 0);
}

#[test]
fn test_garbage_does_not_decode() {
    assert!(matches!(
        VersionSnapshot::decode(b"{\"version\": \"seven\"}"),
        Err(HistoryError::MalformedSnapshot(_))
    ));
}

// --- Write path ---

#[tokio::test]
async fn test_all_backends_failing_is_store_unavailable() {
    let a = MemoryBlobStore::new("a");
    let b = MemoryBlobStore::new("b");
    a.set_fail_writes(true);
    b.set_fail_writes(true);

    let content = Arc::new(ContentStoreClient::new(
        vec![Arc::new(a.clone()) as Arc<dyn Gateway>],
        vec![
            Arc::new(a.clone()) as Arc<dyn Publisher>,
            Arc::new(b.clone()) as Arc<dyn Publisher>,
        ],
        Duration::from_secs(1),
        8,
    ));
    let writer = HistoryWriter::new(content, Arc::new(MemoryEventLog::new()));

    match writer
        .record(&EntityId::new("manga-1"), MutationType::Create, vec![], None)
        .await
    {
        Err(HistoryError::StoreUnavailable { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_update_without_changes_is_rejected() {
    let store = MemoryBlobStore::new("store");
    let writer = HistoryWriter::new(client(&store), Arc::new(MemoryEventLog::new()));

    let result = writer
        .record(&EntityId::new("manga-1"), MutationType::Update, vec![], None)
        .await;
    assert!(matches!(result, Err(HistoryError::InvalidArgument(_))));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_rejected_append_recovers_by_retrying() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 2).await;
    let writer = HistoryWriter::new(client(&store), log.clone());

    log.set_reject_appends(true);
    let err = writer
        .record(&entity, MutationType::Unpublish, vec![], Some(&receipts[1].entry))
        .await
        .unwrap_err();
    let content_id = match err {
        HistoryError::AppendRejected { content_id, .. } => content_id,
        other => panic!("unexpected error: {:?}", other),
    };
    log.set_reject_appends(false);

    let service = HistoryService::new(client(&store), log.clone(), &HistoryConfig::default());
    assert_eq!(service.load_page(&entity, 1, 10).await.unwrap().entries.len(), 2);

    writer.retry_append(&entity, &content_id).await.unwrap();
    service.session(&entity).invalidate();
    let view = service.load_page(&entity, 1, 10).await.unwrap();
    assert_eq!(versions(&view.entries), vec![2, 1, 0]);
}

// --- Page bounds ---

#[tokio::test]
async fn test_invalid_pages() {
    let entity = EntityId::new("manga-1");
    let (store, log, _) = seeded(&entity, 12).await;
    let service = HistoryService::new(client(&store), log, &HistoryConfig::default());

    assert!(matches!(
        service.load_page(&entity, 0, 5).await,
        Err(HistoryError::InvalidPage { page: 0, .. })
    ));
    assert!(matches!(
        service.load_page(&entity, 1, 0).await,
        Err(HistoryError::InvalidArgument(_))
    ));

    service.load_page(&entity, 1, 5).await.unwrap();
    match service.load_page(&entity, 5, 5).await {
        Err(HistoryError::InvalidPage { page, total_pages }) => {
            assert_eq!(page, 5);
            assert_eq!(total_pages, 3);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_walk_page_out_of_range() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 4).await;
    let service = HistoryService::new(client(&store), log, &HistoryConfig::default());

    let result = service
        .walk_full_history(&entity, &receipts[3].entry, 3, 2)
        .await;
    assert!(matches!(
        result,
        Err(HistoryError::InvalidPage {
            page: 3,
            total_pages: 2
        })
    ));
}

// --- Partial history ---

#[tokio::test]
async fn test_unresolvable_newest_event_fails_the_page() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 3).await;
    store.remove(receipts[2].content_id());

    let service = HistoryService::new(client(&store), log, &HistoryConfig::default());
    let result = service.load_page(&entity, 1, 5).await;

    assert!(matches!(result, Err(HistoryError::ContentUnavailable { .. })));
    assert!(matches!(
        service.session(&entity).state(),
        SessionState::Error { .. }
    ));
}

#[tokio::test]
async fn test_unresolvable_older_event_is_partial() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 3).await;
    store.remove(receipts[0].content_id());

    let service = HistoryService::new(client(&store), log, &HistoryConfig::default());
    let view = service.load_page(&entity, 1, 5).await.unwrap();

    assert_eq!(versions(&view.entries), vec![2, 1]);
    assert!(matches!(view.completeness, Completeness::Partial { .. }));
    assert_eq!(view.unreachable, vec![receipts[0].content_id().clone()]);
    assert_eq!(service.session(&entity).state(), SessionState::Ready);
}

#[tokio::test]
async fn test_partial_page_is_fetched_again() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 3).await;
    let blob = receipts[0].entry.snapshot.encode().unwrap();
    store.remove(receipts[0].content_id());

    let service = HistoryService::new(client(&store), log.clone(), &HistoryConfig::default());
    let partial = service.load_page(&entity, 1, 5).await.unwrap();
    assert!(!partial.completeness.is_complete());
    let queries = log.query_count();

    store.insert_raw(receipts[0].content_id().clone(), blob);
    let full = service.load_page(&entity, 1, 5).await.unwrap();
    assert!(full.completeness.is_complete());
    assert!(full.unreachable.is_empty());
    assert_eq!(versions(&full.entries), vec![2, 1, 0]);
    assert_eq!(log.query_count(), queries + 1);

    // Complete pages stay pinned
    service.load_page(&entity, 1, 5).await.unwrap();
    assert_eq!(log.query_count(), queries + 1);
}

#[tokio::test]
async fn test_broken_link_truncates_walk() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 6).await;
    store.remove(receipts[2].content_id());

    let service = HistoryService::new(client(&store), log, &HistoryConfig::default());
    let view = service
        .walk_full_history(&entity, &receipts[5].entry, 1, 10)
        .await
        .unwrap();

    assert_eq!(versions(&view.entries), vec![5, 4, 3]);
    assert!(!view.completeness.is_complete());
    assert_eq!(view.unreachable, vec![receipts[2].content_id().clone()]);
}

#[tokio::test]
async fn test_partial_walk_is_retried() {
    let entity = EntityId::new("manga-1");
    let (store, log, receipts) = seeded(&entity, 4).await;
    let blob = receipts[1].entry.snapshot.encode().unwrap();
    store.remove(receipts[1].content_id());

    let service = HistoryService::new(client(&store), log, &HistoryConfig::default());
    let head = &receipts[3].entry;
    let partial = service.walk_full_history(&entity, head, 1, 10).await.unwrap();
    assert!(!partial.completeness.is_complete());

    // The blob shows up again on the gateway
    store.insert_raw(receipts[1].content_id().clone(), blob);
    let full = service.walk_full_history(&entity, head, 1, 10).await.unwrap();
    assert!(full.completeness.is_complete());
    assert_eq!(versions(&full.entries), vec![3, 2, 1, 0]);
}

// --- Cancellation ---

#[tokio::test(start_paused = true)]
async fn test_new_request_supersedes_in_flight_one() {
    let entity = EntityId::new("manga-1");
    let (store, log, _) = seeded(&entity, 12).await;
    store.set_latency(Some(Duration::from_secs(5)));

    let service = HistoryService::new(
        client_over(&[&store], &store, Duration::from_secs(60)),
        log,
        &HistoryConfig::default(),
    );
    let session = service.session(&entity);

    let superseding = async {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.state(), SessionState::Loading { page: 1 });
        session.load_page(2, 5).await
    };
    let (first, second) = tokio::join!(session.load_page(1, 5), superseding);

    assert!(matches!(first, Err(HistoryError::Cancelled)));
    assert_eq!(versions(&second.unwrap().entries), vec![6, 5, 4, 3, 2]);
    assert_eq!(session.state(), SessionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_discards_in_flight_result() {
    let entity = EntityId::new("manga-1");
    let (store, log, _) = seeded(&entity, 3).await;
    store.set_latency(Some(Duration::from_secs(5)));

    let service = HistoryService::new(
        client_over(&[&store], &store, Duration::from_secs(60)),
        log,
        &HistoryConfig::default(),
    );
    let session = service.session(&entity);

    let cancelling = async {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        session.cancel();
    };
    let (pending, ()) = tokio::join!(session.load_page(1, 5), cancelling);

    assert!(matches!(pending, Err(HistoryError::Cancelled)));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.known_versions(), 0);
}
