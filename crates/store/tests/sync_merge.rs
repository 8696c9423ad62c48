//! Sync-list merge law: after any interleaving of puts and deletes, merging
//! the sync events into the originally listed state reproduces a fresh list.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use std::collections::BTreeMap;

use dim_sync_store::{
    ChangeEvent, Document, DocumentStore, InMemoryDocumentStore, KeyPath, ListOptions, PutRequest,
    annotation_key, merge_events, profile_version_scope,
};
use dim_sync_types::{DestinyVersion, ItemId, ProfileId, config::StoreConfig};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Put(u64, u8),
    Delete(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..12, any::<u8>()).prop_map(|(id, v)| Op::Put(id, v)),
        (0u64..12).prop_map(Op::Delete),
    ]
}

fn key(id: u64) -> KeyPath {
    annotation_key(ProfileId::new(77), DestinyVersion::D2, ItemId::new(id))
}

async fn apply(store: &InMemoryDocumentStore, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Put(id, v) => {
                store.put_batch(vec![PutRequest::new(key(*id), vec![*v])]).await.expect("put");
            },
            Op::Delete(id) => store.delete_batch(&[key(*id)]).await.expect("delete"),
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().build().expect("runtime")
}

proptest! {
    #[test]
    fn prop_sync_merge_matches_relist(
        seed in proptest::collection::vec(op(), 0..20),
        ops in proptest::collection::vec(op(), 0..40),
    ) {
        let rt = runtime();
        let (merged, relisted, events) = rt.block_on(async {
            let store = InMemoryDocumentStore::new(&StoreConfig::default());
            let prefix = profile_version_scope(ProfileId::new(77), DestinyVersion::D2);
            apply(&store, &seed).await;

            let page = store.begin_list(&prefix, ListOptions::default()).await.expect("list");
            let mut local: BTreeMap<KeyPath, Document> =
                page.documents.into_iter().map(|d| (d.key.clone(), d)).collect();

            apply(&store, &ops).await;
            let sync = store.sync_list(&prefix, &page.token).await.expect("sync");
            let events = sync.events.clone();
            assert!(!merge_events(&mut local, sync.events), "full-window token never resets");

            let relisted = store.begin_list(&prefix, ListOptions::default()).await.expect("relist");
            (local.into_values().collect::<Vec<_>>(), relisted.documents, events)
        });

        prop_assert_eq!(merged, relisted);

        // At most one event per key.
        let mut keys: Vec<&KeyPath> = events.iter().filter_map(ChangeEvent::key).collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);
    }
}

#[tokio::test]
async fn test_n_distinct_changes_yield_n_events() {
    let store = InMemoryDocumentStore::new(&StoreConfig::default());
    let prefix = profile_version_scope(ProfileId::new(77), DestinyVersion::D2);
    apply(&store, &[Op::Put(1, 1), Op::Put(2, 2), Op::Put(3, 3)]).await;
    let page = store.begin_list(&prefix, ListOptions::default()).await.expect("list");

    let ops = [Op::Put(4, 4), Op::Delete(1), Op::Put(2, 20), Op::Delete(3), Op::Put(5, 5)];
    apply(&store, &ops).await;

    let sync = store.sync_list(&prefix, &page.token).await.expect("sync");
    assert_eq!(sync.events.len(), ops.len());
    let deleted = sync.events.iter().filter(|e| matches!(e, ChangeEvent::Deleted(_))).count();
    assert_eq!(deleted, 2);
}
