//! In-process relational store.
//!
//! Rows live in per-table ordered maps keyed by the table's primary key, the
//! way the relational schema lays them out. Hashes are stored as received,
//! so one item can sit under both its signed and unsigned spelling; export
//! hands both to the importer, which folds them. Each call holds the table
//! lock for its whole body, which gives every call read-committed isolation
//! against the others.
//!
//! This store is also the home of the per-account migration state.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use dim_sync_store::FaultInjector;
use dim_sync_types::{
    AccountId, DestinyVersion, ExportedAnnotation, ExportedHashTag, ExportedLoadout,
    ExportedSearch, ExportedTriumphs, ItemAnnotation, ItemHashTag, Loadout,
    MigrationState, ProfileComponent, ProfileId, ProfileRequest, ProfileResponse, ProfileUpdate,
    Search, SearchType, Settings, StoreKind, UpdateContext, UpdateResult, UserSnapshot,
    canonicalize_query, normalize_hash,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{ImportStats, MigrationStateStore, ProfileBackend, SwapOutcome},
    error::{ProfileError, Result},
    kind::parse_item_id,
    records::invalid,
};

type LoadoutRow = (AccountId, ProfileId, DestinyVersion, Uuid);
type AnnotationRow = (AccountId, ProfileId, DestinyVersion, String);
type HashTagRow = (AccountId, ProfileId, i64);
type TriumphRow = (AccountId, ProfileId, i64);
type SearchRow = (AccountId, DestinyVersion, SearchType, String);

#[derive(Debug, Default)]
struct Tables {
    settings: BTreeMap<AccountId, Settings>,
    loadouts: BTreeMap<LoadoutRow, Loadout>,
    item_annotations: BTreeMap<AnnotationRow, ItemAnnotation>,
    item_hash_tags: BTreeMap<HashTagRow, ItemHashTag>,
    tracked_triumphs: BTreeSet<TriumphRow>,
    searches: BTreeMap<SearchRow, Search>,
    migration_state: BTreeMap<AccountId, MigrationState>,
}

impl Tables {
    fn delete_account(&mut self, account: AccountId) -> usize {
        let before = self.record_count(account);
        self.settings.remove(&account);
        self.loadouts.retain(|row, _| row.0 != account);
        self.item_annotations.retain(|row, _| row.0 != account);
        self.item_hash_tags.retain(|row, _| row.0 != account);
        self.tracked_triumphs.retain(|row| row.0 != account);
        self.searches.retain(|row, _| row.0 != account);
        before
    }

    fn record_count(&self, account: AccountId) -> usize {
        usize::from(self.settings.contains_key(&account))
            + self.loadouts.keys().filter(|row| row.0 == account).count()
            + self.item_annotations.keys().filter(|row| row.0 == account).count()
            + self.item_hash_tags.keys().filter(|row| row.0 == account).count()
            + self.tracked_triumphs.iter().filter(|row| row.0 == account).count()
            + self.searches.keys().filter(|row| row.0 == account).count()
    }

    fn apply(&mut self, context: &UpdateContext, update: &ProfileUpdate) -> Result<()> {
        let account = context.account;
        let version = context.destiny_version;
        let profile = || {
            context.profile.ok_or(ProfileError::ProfileRequired { action: update.action() })
        };
        match update {
            ProfileUpdate::Setting(patch) => {
                patch.apply(self.settings.entry(account).or_default());
            },
            ProfileUpdate::Loadout(loadout) => {
                let row = (account, profile()?, version, loadout.id);
                let now = Utc::now();
                let created_at = self
                    .loadouts
                    .get(&row)
                    .and_then(|existing| existing.created_at)
                    .or(loadout.created_at)
                    .unwrap_or(now);
                let mut stored = loadout.clone();
                stored.created_at = Some(created_at);
                stored.last_updated_at = Some(now);
                self.loadouts.insert(row, stored);
            },
            ProfileUpdate::DeleteLoadout(id) => {
                self.loadouts.remove(&(account, profile()?, version, *id));
            },
            ProfileUpdate::Tag(annotation) => {
                parse_item_id(&annotation.id)?;
                let row = (account, profile()?, version, annotation.id.clone());
                if annotation.is_empty() {
                    self.item_annotations.remove(&row);
                } else {
                    self.item_annotations.insert(row, annotation.clone());
                }
            },
            ProfileUpdate::TagCleanup(ids) => {
                let profile = profile()?;
                for id in ids {
                    self.item_annotations.remove(&(account, profile, version, id.clone()));
                }
            },
            ProfileUpdate::ItemHashTag(hash_tag) => {
                normalize_hash(hash_tag.hash).map_err(|e| invalid("item hash tag", e))?;
                let row = (account, profile()?, hash_tag.hash);
                if hash_tag.is_empty() {
                    self.item_hash_tags.remove(&row);
                } else {
                    self.item_hash_tags.insert(row, hash_tag.clone());
                }
            },
            ProfileUpdate::TrackTriumph { record_hash, tracked } => {
                normalize_hash(*record_hash).map_err(|e| invalid("triumph", e))?;
                let row = (account, profile()?, *record_hash);
                if *tracked {
                    self.tracked_triumphs.insert(row);
                } else {
                    self.tracked_triumphs.remove(&row);
                }
            },
            ProfileUpdate::Search { query, search_type } => {
                let row = (account, version, *search_type, canonical(query)?);
                let search = self.searches.entry(row.clone()).or_insert_with(|| Search {
                    query: row.3.clone(),
                    usage_count: 0,
                    saved: false,
                    last_usage: Utc::now(),
                    search_type: *search_type,
                });
                search.usage_count = search.usage_count.saturating_add(1);
                search.last_usage = Utc::now();
            },
            ProfileUpdate::SaveSearch { query, search_type, saved } => {
                let row = (account, version, *search_type, canonical(query)?);
                match self.searches.get_mut(&row) {
                    Some(search) => search.saved = *saved,
                    None if *saved => {
                        let search = Search {
                            query: row.3.clone(),
                            usage_count: 1,
                            saved: true,
                            last_usage: Utc::now(),
                            search_type: *search_type,
                        };
                        self.searches.insert(row, search);
                    },
                    None => {},
                }
            },
            ProfileUpdate::DeleteSearch { query, search_type } => {
                self.searches.remove(&(account, version, *search_type, canonical(query)?));
            },
        }
        Ok(())
    }
}

/// Relational store held in process memory, with injectable failures.
#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    tables: Mutex<Tables>,
    faults: FaultInjector,
}

impl MemoryLegacyStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection controls.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    async fn check(&self, operation: &str) -> Result<()> {
        self.faults.check(operation).await.map_err(|e| unavailable(operation, e))
    }

    async fn check_write(&self, operation: &str) -> Result<()> {
        self.check(operation).await?;
        self.faults.check_write(operation).map_err(|e| unavailable(operation, e))
    }
}

#[async_trait]
impl ProfileBackend for MemoryLegacyStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Legacy
    }

    async fn read_profile(&self, request: &ProfileRequest) -> Result<ProfileResponse> {
        self.check("read_profile").await?;
        let account = request.account;
        let version = request.destiny_version;
        let profile = if request.components.iter().any(|c| c.is_profile_scoped()) {
            Some(request.profile.ok_or(ProfileError::ProfileRequired { action: "read_profile" })?)
        } else {
            None
        };

        let tables = self.tables.lock();
        let mut response = ProfileResponse::default();
        if request.wants(ProfileComponent::Settings) {
            response.settings = tables.settings.get(&account).cloned();
        }
        if let Some(profile) = profile {
            let owned = |a: AccountId, p: ProfileId| a == account && p == profile;
            if request.wants(ProfileComponent::Loadouts) {
                response.loadouts = tables
                    .loadouts
                    .iter()
                    .filter(|((a, p, v, _), _)| owned(*a, *p) && *v == version)
                    .map(|(_, loadout)| loadout.clone())
                    .collect();
            }
            if request.wants(ProfileComponent::Tags) {
                response.tags = tables
                    .item_annotations
                    .iter()
                    .filter(|((a, p, v, _), _)| owned(*a, *p) && *v == version)
                    .map(|(_, annotation)| annotation.clone())
                    .collect();
            }
            // Hash tags and triumphs exist for Destiny 2 only.
            if version == DestinyVersion::D2 && request.wants(ProfileComponent::HashTags) {
                response.item_hash_tags = tables
                    .item_hash_tags
                    .iter()
                    .filter(|((a, p, _), _)| owned(*a, *p))
                    .map(|(_, hash_tag)| hash_tag.clone())
                    .collect();
            }
            if version == DestinyVersion::D2 && request.wants(ProfileComponent::Triumphs) {
                let hashes: BTreeSet<u32> = tables
                    .tracked_triumphs
                    .iter()
                    .filter(|(a, p, _)| owned(*a, *p))
                    .filter_map(|(_, _, hash)| normalize_hash(*hash).ok())
                    .collect();
                response.triumphs = hashes.into_iter().collect();
            }
        }
        if request.wants(ProfileComponent::Searches) {
            response.searches = tables
                .searches
                .iter()
                .filter(|((a, v, _, _), _)| *a == account && *v == version)
                .map(|(_, search)| search.clone())
                .collect();
        }
        Ok(response)
    }

    async fn apply_updates(
        &self,
        context: &UpdateContext,
        updates: &[ProfileUpdate],
    ) -> Result<Vec<UpdateResult>> {
        self.check_write("apply_updates").await?;
        let mut tables = self.tables.lock();
        Ok(updates
            .iter()
            .map(|update| match tables.apply(context, update) {
                Ok(()) => UpdateResult::Success,
                Err(err) => {
                    warn!(account = %context.account, action = update.action(), error = %err, "update rejected");
                    UpdateResult::failed(err.to_string())
                },
            })
            .collect())
    }

    async fn export_user(&self, account: AccountId) -> Result<UserSnapshot> {
        self.check("export_user").await?;
        let tables = self.tables.lock();

        let mut triumphs: BTreeMap<ProfileId, Vec<i64>> = BTreeMap::new();
        for (_, profile, hash) in tables.tracked_triumphs.iter().filter(|row| row.0 == account) {
            triumphs.entry(*profile).or_default().push(*hash);
        }

        Ok(UserSnapshot {
            settings: tables.settings.get(&account).cloned(),
            loadouts: tables
                .loadouts
                .iter()
                .filter(|(row, _)| row.0 == account)
                .map(|((_, profile, version, _), loadout)| ExportedLoadout {
                    platform_membership_id: *profile,
                    destiny_version: *version,
                    loadout: loadout.clone(),
                })
                .collect(),
            tags: tables
                .item_annotations
                .iter()
                .filter(|(row, _)| row.0 == account)
                .map(|((_, profile, version, _), annotation)| ExportedAnnotation {
                    platform_membership_id: *profile,
                    destiny_version: *version,
                    annotation: annotation.clone(),
                })
                .collect(),
            item_hash_tags: tables
                .item_hash_tags
                .iter()
                .filter(|(row, _)| row.0 == account)
                .map(|((_, profile, _), hash_tag)| ExportedHashTag {
                    platform_membership_id: *profile,
                    hash_tag: hash_tag.clone(),
                })
                .collect(),
            triumphs: triumphs
                .into_iter()
                .map(|(platform_membership_id, triumphs)| ExportedTriumphs {
                    platform_membership_id,
                    triumphs,
                })
                .collect(),
            searches: tables
                .searches
                .iter()
                .filter(|(row, _)| row.0 == account)
                .map(|((_, version, _, _), search)| ExportedSearch {
                    destiny_version: *version,
                    search: search.clone(),
                })
                .collect(),
        })
    }

    async fn import_user(
        &self,
        account: AccountId,
        snapshot: &UserSnapshot,
    ) -> Result<ImportStats> {
        self.check_write("import_user").await?;
        let mut tables = self.tables.lock();
        let mut stats = ImportStats { deleted: tables.delete_account(account), ..ImportStats::default() };
        let mut track = |replaced: bool| {
            if replaced {
                stats.deduplicated += 1;
            } else {
                stats.written += 1;
            }
        };

        if let Some(settings) = &snapshot.settings {
            track(tables.settings.insert(account, settings.clone()).is_some());
        }
        for entry in &snapshot.loadouts {
            let row = (account, entry.platform_membership_id, entry.destiny_version, entry.loadout.id);
            track(tables.loadouts.insert(row, entry.loadout.clone()).is_some());
        }
        for entry in snapshot.tags.iter().filter(|e| !e.annotation.is_empty()) {
            let row = (
                account,
                entry.platform_membership_id,
                entry.destiny_version,
                entry.annotation.id.clone(),
            );
            track(tables.item_annotations.insert(row, entry.annotation.clone()).is_some());
        }
        for entry in snapshot.item_hash_tags.iter().filter(|e| !e.hash_tag.is_empty()) {
            let row = (account, entry.platform_membership_id, entry.hash_tag.hash);
            track(tables.item_hash_tags.insert(row, entry.hash_tag.clone()).is_some());
        }
        for entry in &snapshot.triumphs {
            for hash in &entry.triumphs {
                track(!tables.tracked_triumphs.insert((account, entry.platform_membership_id, *hash)));
            }
        }
        for entry in &snapshot.searches {
            let query = canonicalize_query(&entry.search.query);
            let row = (account, entry.destiny_version, entry.search.search_type, query.clone());
            let search = Search { query, ..entry.search.clone() };
            track(tables.searches.insert(row, search).is_some());
        }

        info!(
            account = %account,
            destination = %StoreKind::Legacy,
            written = stats.written,
            deleted = stats.deleted,
            deduplicated = stats.deduplicated,
            "imported account"
        );
        Ok(stats)
    }

    async fn delete_all_data(&self, account: AccountId) -> Result<usize> {
        self.check_write("delete_all_data").await?;
        let deleted = self.tables.lock().delete_account(account);
        debug!(account = %account, deleted, "deleted legacy rows");
        Ok(deleted)
    }

    async fn count_records(&self, account: AccountId) -> Result<usize> {
        self.check("count_records").await?;
        Ok(self.tables.lock().record_count(account))
    }
}

#[async_trait]
impl MigrationStateStore for MemoryLegacyStore {
    async fn load_state(&self, account: AccountId) -> Result<Option<MigrationState>> {
        self.check("load_state").await?;
        Ok(self.tables.lock().migration_state.get(&account).cloned())
    }

    async fn swap_state(
        &self,
        expected_revision: u64,
        mut next: MigrationState,
    ) -> Result<SwapOutcome> {
        self.check_write("swap_state").await?;
        let mut tables = self.tables.lock();
        let current = tables
            .migration_state
            .get(&next.account)
            .cloned()
            .unwrap_or_else(|| MigrationState::initial(next.account));
        if current.revision != expected_revision {
            return Ok(SwapOutcome::Stale(current));
        }
        next.revision = expected_revision + 1;
        tables.migration_state.insert(next.account, next.clone());
        Ok(SwapOutcome::Swapped(next))
    }

    async fn delete_state(&self, account: AccountId) -> Result<()> {
        self.check_write("delete_state").await?;
        self.tables.lock().migration_state.remove(&account);
        Ok(())
    }
}

fn canonical(query: &str) -> Result<String> {
    let canonical = canonicalize_query(query);
    if canonical.is_empty() {
        return Err(invalid("search", "query is empty"));
    }
    Ok(canonical)
}

fn unavailable(operation: &str, err: impl std::fmt::Display) -> ProfileError {
    ProfileError::LegacyUnavailable { operation: operation.to_string(), message: err.to_string() }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use dim_sync_types::{MigrationStatus, TagValue};

    use super::*;

    const ACCOUNT: AccountId = AccountId::new(4321);
    const PROFILE: ProfileId = ProfileId::new(77);

    fn context() -> UpdateContext {
        UpdateContext { account: ACCOUNT, profile: Some(PROFILE), destiny_version: DestinyVersion::D2 }
    }

    #[tokio::test]
    async fn test_hashes_are_kept_as_received() {
        let store = MemoryLegacyStore::new();
        let tag = |hash| ProfileUpdate::ItemHashTag(ItemHashTag { hash, tag: Some(TagValue::Keep), notes: None });
        store.apply_updates(&context(), &[tag(-1), tag(i64::from(u32::MAX))]).await.expect("apply");
        let snapshot = store.export_user(ACCOUNT).await.expect("export");
        assert_eq!(snapshot.item_hash_tags.len(), 2);
        assert_eq!(store.count_records(ACCOUNT).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn test_triumphs_read_back_canonical() {
        let store = MemoryLegacyStore::new();
        let track = |record_hash| ProfileUpdate::TrackTriumph { record_hash, tracked: true };
        store.apply_updates(&context(), &[track(-1), track(3)]).await.expect("apply");
        let response = store
            .read_profile(&ProfileRequest::full(ACCOUNT, PROFILE, DestinyVersion::D2))
            .await
            .expect("read");
        assert_eq!(response.triumphs, vec![3, u32::MAX]);
        assert!(response.sync_token.is_none());
    }

    #[tokio::test]
    async fn test_sync_token_is_ignored() {
        let store = MemoryLegacyStore::new();
        let track = ProfileUpdate::TrackTriumph { record_hash: 3, tracked: true };
        store.apply_updates(&context(), &[track]).await.expect("apply");
        let request = ProfileRequest::full(ACCOUNT, PROFILE, DestinyVersion::D2).since("issued-elsewhere");
        let response = store.read_profile(&request).await.expect("read");
        assert!(!response.incremental);
        assert_eq!(response.triumphs, vec![3]);
    }

    #[tokio::test]
    async fn test_non_canonical_item_id_is_refused() {
        let store = MemoryLegacyStore::new();
        let tag = |id: &str| {
            ProfileUpdate::Tag(ItemAnnotation {
                id: id.into(),
                tag: Some(TagValue::Favorite),
                notes: None,
                crafted_date: None,
            })
        };
        let results = store.apply_updates(&context(), &[tag("012"), tag("12")]).await.expect("apply");
        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        let snapshot = store.export_user(ACCOUNT).await.expect("export");
        let ids: Vec<_> = snapshot.tags.iter().map(|t| t.annotation.id.as_str()).collect();
        assert_eq!(ids, vec!["12"]);
    }

    #[tokio::test]
    async fn test_import_replaces_account_rows() {
        let store = MemoryLegacyStore::new();
        store
            .apply_updates(&context(), &[ProfileUpdate::Search { query: "a".into(), search_type: SearchType::Item }])
            .await
            .expect("apply");
        let snapshot = UserSnapshot { settings: Some(Settings::default()), ..UserSnapshot::default() };
        let stats = store.import_user(ACCOUNT, &snapshot).await.expect("import");
        assert_eq!((stats.deleted, stats.written), (1, 1));
        assert_eq!(store.export_user(ACCOUNT).await.expect("export"), snapshot);
    }

    #[tokio::test]
    async fn test_swap_state_is_compare_and_swap() {
        let store = MemoryLegacyStore::new();
        let next = MigrationState { status: MigrationStatus::MigratingToNew, ..MigrationState::initial(ACCOUNT) };
        let SwapOutcome::Swapped(stored) = store.swap_state(0, next.clone()).await.expect("swap") else {
            panic!("first swap must win")
        };
        assert_eq!(stored.revision, 1);
        let SwapOutcome::Stale(current) = store.swap_state(0, next).await.expect("swap") else {
            panic!("second swap must lose")
        };
        assert_eq!(current, stored);
        store.delete_state(ACCOUNT).await.expect("delete");
        assert!(store.load_state(ACCOUNT).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_injected_failures_surface_as_unavailable() {
        let store = MemoryLegacyStore::new();
        store.faults().inject_unavailable(1);
        let err = store.export_user(ACCOUNT).await.unwrap_err();
        assert!(matches!(err, ProfileError::LegacyUnavailable { .. }));
        assert!(err.is_retryable());
        store.export_user(ACCOUNT).await.expect("recovered");
    }
}
