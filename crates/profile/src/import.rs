//! Whole-account export, import and wipe for the document adapter.
//!
//! An account's documents live in its account scope plus one scope per
//! linked profile. Import wipes all of them, converts the snapshot into
//! stored items, folds records that map to the same key, and writes the
//! result with must-not-exist puts so a stale leftover fails the import
//! instead of blending into it.

use std::collections::{BTreeMap, BTreeSet};

use dim_sync_store::{
    Document, KeyPath, PutRequest, account_scope, profile_link_key, profile_scope,
};
use dim_sync_types::{
    AccountId, ExportedAnnotation, ExportedHashTag, ExportedLoadout, ExportedSearch,
    ExportedTriumphs, ProfileId, Search, StoreKind, UserSnapshot,
};
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    backend::ImportStats,
    document::{ProfileStore, decode_all},
    error::{Result, StoreSnafu},
    kind::StoredItem,
};

impl ProfileStore {
    /// Every document under the account's scopes, including profile scopes
    /// linked from the account and any listed in `extra_profiles`.
    pub(crate) async fn account_documents(
        &self,
        account: AccountId,
        extra_profiles: &[ProfileId],
    ) -> Result<Vec<Document>> {
        let mut docs = self
            .client()
            .list_all(&account_scope(account))
            .await
            .context(StoreSnafu { account, operation: "list_account" })?;

        let mut profiles: BTreeSet<ProfileId> = extra_profiles.iter().copied().collect();
        profiles.extend(docs.iter().filter_map(|doc| match StoredItem::decode(doc) {
            Ok(StoredItem::ProfileLink { profile, .. }) => Some(profile),
            _ => None,
        }));

        for profile in profiles {
            let scoped = self
                .client()
                .list_all(&profile_scope(profile))
                .await
                .context(StoreSnafu { account, operation: "list_profile" })?;
            docs.extend(scoped);
        }
        Ok(docs)
    }

    /// Deletes every document under the account's scopes. Returns the number
    /// of records removed, not counting profile links.
    pub(crate) async fn wipe_account(
        &self,
        account: AccountId,
        extra_profiles: &[ProfileId],
    ) -> Result<usize> {
        let docs = self.account_documents(account, extra_profiles).await?;
        let keys: Vec<KeyPath> = docs.iter().map(|doc| doc.key.clone()).collect();
        let records = docs
            .iter()
            .filter(|doc| !matches!(StoredItem::decode(doc), Ok(StoredItem::ProfileLink { .. })))
            .count();
        self.delete_keys(account, "wipe_account", &keys).await?;
        debug!(account = %account, documents = keys.len(), "wiped account scopes");
        Ok(records)
    }

    pub(crate) async fn export_snapshot(&self, account: AccountId) -> Result<UserSnapshot> {
        let docs = self.account_documents(account, &[]).await?;
        let mut snapshot = UserSnapshot::default();
        let mut triumphs: BTreeMap<ProfileId, Vec<i64>> = BTreeMap::new();

        for item in decode_all(&docs)? {
            match item {
                StoredItem::Settings { settings, .. } => snapshot.settings = Some(settings),
                StoredItem::Search { version, search, .. } => {
                    snapshot.searches.push(ExportedSearch { destiny_version: version, search });
                },
                StoredItem::ProfileLink { .. } => {},
                StoredItem::Loadout { profile, version, loadout } => {
                    snapshot.loadouts.push(ExportedLoadout {
                        platform_membership_id: profile,
                        destiny_version: version,
                        loadout,
                    });
                },
                StoredItem::Annotation { profile, version, annotation, .. } => {
                    snapshot.tags.push(ExportedAnnotation {
                        platform_membership_id: profile,
                        destiny_version: version,
                        annotation,
                    });
                },
                StoredItem::HashTag { profile, hash_tag, .. } => {
                    snapshot
                        .item_hash_tags
                        .push(ExportedHashTag { platform_membership_id: profile, hash_tag });
                },
                StoredItem::Triumph { profile, record_hash } => {
                    triumphs.entry(profile).or_default().push(i64::from(record_hash));
                },
                item @ (StoredItem::App(_) | StoredItem::GlobalSettings { .. }) => {
                    warn!(account = %account, kind = item.kind_name(), "global record under account scope");
                },
            }
        }
        snapshot.triumphs = triumphs
            .into_iter()
            .map(|(platform_membership_id, triumphs)| ExportedTriumphs {
                platform_membership_id,
                triumphs,
            })
            .collect();
        Ok(snapshot)
    }

    pub(crate) async fn import_snapshot(
        &self,
        account: AccountId,
        snapshot: &UserSnapshot,
    ) -> Result<ImportStats> {
        let mut stats = ImportStats::default();
        let items = convert_snapshot(account, snapshot, &mut stats);
        let (records, deduplicated) = dedup(items)?;
        stats.deduplicated = deduplicated;

        let profiles: BTreeSet<ProfileId> = records.values().filter_map(profile_of).collect();
        let extra: Vec<ProfileId> = profiles.iter().copied().collect();
        stats.deleted = self.wipe_account(account, &extra).await?;

        let mut puts: Vec<PutRequest> = records
            .values()
            .map(|item| item.to_put().map(PutRequest::must_not_exist))
            .collect::<Result<_>>()?;
        stats.written = puts.len();
        puts.extend(
            profiles
                .into_iter()
                .map(|profile| PutRequest::new(profile_link_key(account, profile), Vec::new())),
        );

        self.client()
            .put_many(&puts, self.batch_delay())
            .await
            .context(StoreSnafu { account, operation: "import_user" })?;

        info!(
            account = %account,
            destination = %StoreKind::Document,
            written = stats.written,
            deleted = stats.deleted,
            deduplicated = stats.deduplicated,
            dropped = stats.dropped,
            "imported account"
        );
        Ok(stats)
    }
}

/// Converts every snapshot record, dropping the ones that cannot be stored.
pub(crate) fn convert_snapshot(
    account: AccountId,
    snapshot: &UserSnapshot,
    stats: &mut ImportStats,
) -> Vec<StoredItem> {
    let mut items = Vec::with_capacity(snapshot.record_count());
    let mut keep = |converted: Result<StoredItem>| match converted {
        Ok(item) => items.push(item),
        Err(err) => {
            warn!(account = %account, error = %err, "dropping record that cannot be stored");
            stats.dropped += 1;
        },
    };

    if let Some(settings) = &snapshot.settings {
        keep(Ok(StoredItem::Settings { account, settings: settings.clone() }));
    }
    for entry in &snapshot.loadouts {
        let item = StoredItem::Loadout {
            profile: entry.platform_membership_id,
            version: entry.destiny_version,
            loadout: entry.loadout.clone(),
        };
        // Loadout item hashes are only checked on encode.
        keep(item.encode().map(|_| item));
    }
    for entry in &snapshot.tags {
        // Empty annotations are never stored.
        if !entry.annotation.is_empty() {
            keep(StoredItem::annotation(
                entry.platform_membership_id,
                entry.destiny_version,
                entry.annotation.clone(),
            ));
        }
    }
    for entry in &snapshot.item_hash_tags {
        if !entry.hash_tag.is_empty() {
            keep(StoredItem::hash_tag(entry.platform_membership_id, entry.hash_tag.clone()));
        }
    }
    for entry in &snapshot.triumphs {
        for &record_hash in &entry.triumphs {
            keep(StoredItem::triumph(entry.platform_membership_id, record_hash));
        }
    }
    for entry in &snapshot.searches {
        keep(StoredItem::search(account, entry.destiny_version, entry.search.clone()));
    }
    items
}

/// Folds items that map to the same key. Searches merge; any other kind
/// keeps the last occurrence. Returns the items by key and how many were folded.
pub(crate) fn dedup(items: Vec<StoredItem>) -> Result<(BTreeMap<KeyPath, StoredItem>, usize)> {
    let mut by_key: BTreeMap<KeyPath, StoredItem> = BTreeMap::new();
    let mut folded = 0;
    for item in items {
        let key = item.key()?;
        let merged = match (by_key.remove(&key), item) {
            (None, item) => item,
            (
                Some(StoredItem::Search { search: previous, .. }),
                StoredItem::Search { account, version, search },
            ) => {
                folded += 1;
                StoredItem::Search { account, version, search: merge_searches(previous, search) }
            },
            (Some(_), item) => {
                folded += 1;
                item
            },
        };
        by_key.insert(key, merged);
    }
    Ok((by_key, folded))
}

fn merge_searches(a: Search, b: Search) -> Search {
    Search {
        usage_count: a.usage_count.max(b.usage_count),
        saved: a.saved || b.saved,
        last_usage: a.last_usage.max(b.last_usage),
        ..b
    }
}

fn profile_of(item: &StoredItem) -> Option<ProfileId> {
    match item {
        StoredItem::Loadout { profile, .. }
        | StoredItem::Annotation { profile, .. }
        | StoredItem::HashTag { profile, .. }
        | StoredItem::Triumph { profile, .. }
        | StoredItem::ProfileLink { profile, .. } => Some(*profile),
        StoredItem::Settings { .. }
        | StoredItem::Search { .. }
        | StoredItem::App(_)
        | StoredItem::GlobalSettings { .. } => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use dim_sync_types::{
        DestinyVersion, ItemAnnotation, ItemHashTag, SearchType, Settings, TagValue,
    };

    use super::*;

    const ACCOUNT: AccountId = AccountId::new(9);
    const PROFILE: ProfileId = ProfileId::new(1);

    fn search(query: &str, usage_count: u32, saved: bool, millis: i64) -> ExportedSearch {
        ExportedSearch {
            destiny_version: DestinyVersion::D2,
            search: Search {
                query: query.into(),
                usage_count,
                saved,
                last_usage: Utc.timestamp_millis_opt(millis).unwrap(),
                search_type: SearchType::Item,
            },
        }
    }

    #[test]
    fn test_near_identical_searches_merge() {
        let snapshot = UserSnapshot {
            searches: vec![search("is:weapon  ", 3, false, 10), search(" is:weapon", 1, true, 20)],
            ..UserSnapshot::default()
        };
        let mut stats = ImportStats::default();
        let (records, folded) = dedup(convert_snapshot(ACCOUNT, &snapshot, &mut stats)).expect("dedup");
        assert_eq!(folded, 1);
        let Some(StoredItem::Search { search, .. }) = records.into_values().next() else {
            panic!("expected a search")
        };
        assert_eq!(search.query, "is:weapon");
        assert_eq!(search.usage_count, 3);
        assert!(search.saved);
        assert_eq!(search.last_usage.timestamp_millis(), 20);
    }

    #[test]
    fn test_hash_tags_spelled_both_ways_collapse() {
        let tag = |hash| ExportedHashTag {
            platform_membership_id: PROFILE,
            hash_tag: ItemHashTag { hash, tag: Some(TagValue::Keep), notes: None },
        };
        let snapshot = UserSnapshot {
            item_hash_tags: vec![tag(-1), tag(i64::from(u32::MAX))],
            ..UserSnapshot::default()
        };
        let mut stats = ImportStats::default();
        let (records, folded) = dedup(convert_snapshot(ACCOUNT, &snapshot, &mut stats)).expect("dedup");
        assert_eq!((records.len(), folded), (1, 1));
    }

    #[test]
    fn test_unconvertible_records_are_dropped() {
        let snapshot = UserSnapshot {
            settings: Some(Settings::default()),
            tags: vec![
                ExportedAnnotation {
                    platform_membership_id: PROFILE,
                    destiny_version: DestinyVersion::D2,
                    annotation: ItemAnnotation {
                        id: "bogus".into(),
                        tag: Some(TagValue::Junk),
                        notes: None,
                        crafted_date: None,
                    },
                },
                ExportedAnnotation {
                    platform_membership_id: PROFILE,
                    destiny_version: DestinyVersion::D2,
                    annotation: ItemAnnotation {
                        id: "12".into(),
                        tag: None,
                        notes: Some(String::new()),
                        crafted_date: None,
                    },
                },
            ],
            triumphs: vec![ExportedTriumphs { platform_membership_id: PROFILE, triumphs: vec![1, i64::MIN] }],
            ..UserSnapshot::default()
        };
        let mut stats = ImportStats::default();
        let items = convert_snapshot(ACCOUNT, &snapshot, &mut stats);
        assert_eq!(stats.dropped, 2);
        // Settings and one triumph; the empty annotation is skipped silently.
        assert_eq!(items.len(), 2);
    }
}
