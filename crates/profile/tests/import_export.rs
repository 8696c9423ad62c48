//! Bulk import and export through the document adapter.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::sync::Arc;

use dim_sync_profile::{MemoryLegacyStore, ProfileBackend, ProfileError, ProfileStore};
use dim_sync_store::{InMemoryDocumentStore, StoreClient, StoreError};
use dim_sync_test_utils::{
    fixtures::{SAMPLE_ACCOUNT, SAMPLE_PROFILE, sample_snapshot},
    init_tracing, strategies, test_retry_config, test_store_config, test_transfer_config,
};
use dim_sync_types::{
    AccountId, DestinyVersion, ProfileRequest, TagValue, UserSnapshot, normalize_hash,
};
use proptest::prelude::*;

fn document_store() -> (Arc<InMemoryDocumentStore>, ProfileStore) {
    let memory = Arc::new(InMemoryDocumentStore::new(&test_store_config()));
    let client = StoreClient::new(memory.clone(), test_store_config(), &test_retry_config());
    (memory, ProfileStore::new(client, &test_transfer_config()))
}

#[tokio::test]
async fn test_sample_import_folds_collisions() {
    init_tracing();
    let (_, store) = document_store();
    let snapshot = sample_snapshot();

    let stats = store.import_user(SAMPLE_ACCOUNT, &snapshot).await.expect("import");
    // Two spellings of one query fold together; the empty annotation is skipped.
    assert_eq!(stats.deduplicated, 1);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.written, snapshot.record_count() - 2);
    assert_eq!(store.count_records(SAMPLE_ACCOUNT).await.expect("count"), stats.written);

    let exported = store.export_user(SAMPLE_ACCOUNT).await.expect("export");
    let outlaw = exported
        .searches
        .iter()
        .find(|s| s.search.query == "is:weapon perk:outlaw")
        .expect("merged search");
    assert_eq!(outlaw.search.usage_count, 4);
    assert!(outlaw.search.saved);

    let hash_tag = &exported.item_hash_tags[0].hash_tag;
    assert_eq!(hash_tag.hash, i64::from(normalize_hash(-1153742474).expect("hash")));
    assert_eq!(hash_tag.tag, Some(TagValue::Keep));

    let loadout = &exported.loadouts[0].loadout;
    assert!(loadout.extra.is_empty());
    assert_eq!(loadout.created_at.expect("created").timestamp_millis(), 1_650_000_000_000);
}

#[tokio::test]
async fn test_import_twice_is_idempotent() {
    let (memory, store) = document_store();
    let snapshot = sample_snapshot();
    store.import_user(SAMPLE_ACCOUNT, &snapshot).await.expect("first import");
    let first = store.export_user(SAMPLE_ACCOUNT).await.expect("export");
    let documents = memory.len();

    let stats = store.import_user(SAMPLE_ACCOUNT, &snapshot).await.expect("second import");
    assert_eq!(stats.deleted, stats.written);
    let second = store.export_user(SAMPLE_ACCOUNT).await.expect("export");
    assert_eq!(first.normalized(), second.normalized());
    assert_eq!(memory.len(), documents);
}

#[tokio::test]
async fn test_import_leaves_other_accounts_alone() {
    let (_, store) = document_store();
    let other = AccountId::new(1234);
    store.import_user(other, &sample_snapshot()).await.expect("other import");
    // Account-scoped records only; profile scopes belong to one account.
    let mut mine = UserSnapshot { settings: sample_snapshot().settings, ..UserSnapshot::default() };
    mine.searches = sample_snapshot().searches;
    store.import_user(SAMPLE_ACCOUNT, &mine).await.expect("import");
    store.delete_all_data(SAMPLE_ACCOUNT).await.expect("delete");

    assert_eq!(store.count_records(SAMPLE_ACCOUNT).await.expect("count"), 0);
    assert!(store.count_records(other).await.expect("count") > 0);
}

#[tokio::test]
async fn test_failed_import_reports_store_error() {
    let (memory, store) = document_store();
    memory.faults().fail_writes_after(2);
    let err = store.import_user(SAMPLE_ACCOUNT, &sample_snapshot()).await.unwrap_err();
    assert!(matches!(err, ProfileError::Store { source: StoreError::Unavailable { .. }, .. }));

    // Earlier batches stay written; a clean retry replaces them.
    memory.faults().clear();
    let stats = store.import_user(SAMPLE_ACCOUNT, &sample_snapshot()).await.expect("retry");
    assert_eq!(store.count_records(SAMPLE_ACCOUNT).await.expect("count"), stats.written);
}

#[tokio::test]
async fn test_imported_profile_reads_back() {
    let (_, store) = document_store();
    store.import_user(SAMPLE_ACCOUNT, &sample_snapshot()).await.expect("import");
    let response = store
        .read_profile(&ProfileRequest::full(SAMPLE_ACCOUNT, SAMPLE_PROFILE, DestinyVersion::D2))
        .await
        .expect("read");
    assert_eq!(response.loadouts.len(), 1);
    assert_eq!(response.tags.len(), 2);
    assert_eq!(response.triumphs.len(), 2);
    assert_eq!(response.searches.len(), 2);
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().build().expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_export_import_export_is_stable(snapshot in strategies::arb_snapshot()) {
        let (first, second) = runtime().block_on(async {
            let (_, store) = document_store();
            store.import_user(SAMPLE_ACCOUNT, &snapshot).await.expect("import");
            let first = store.export_user(SAMPLE_ACCOUNT).await.expect("export");
            store.import_user(SAMPLE_ACCOUNT, &first).await.expect("reimport");
            let second = store.export_user(SAMPLE_ACCOUNT).await.expect("export");
            (first, second)
        });
        prop_assert_eq!(first.normalized(), second.normalized());
        prop_assert_eq!(first.normalized(), snapshot.normalized());
    }

    #[test]
    fn prop_legacy_and_document_exports_agree(snapshot in strategies::arb_snapshot()) {
        let (legacy, document) = runtime().block_on(async {
            let legacy = MemoryLegacyStore::new();
            legacy.import_user(SAMPLE_ACCOUNT, &snapshot).await.expect("legacy import");
            let exported = legacy.export_user(SAMPLE_ACCOUNT).await.expect("legacy export");

            let (_, store) = document_store();
            store.import_user(SAMPLE_ACCOUNT, &exported).await.expect("document import");
            (exported, store.export_user(SAMPLE_ACCOUNT).await.expect("document export"))
        });
        prop_assert_eq!(legacy.normalized(), document.normalized());
    }
}
