//! Profile adapter over the document store.
//!
//! Reads return domain records plus a sync token; writes are per-kind puts,
//! deletes and optimistic updates addressed through the key codec. Account
//! scope holds settings, searches and one link per profile the account has
//! written to; the links are how export and wipe find profile scopes.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dim_sync_store::{
    ChangeEvent, KeyId, KeyPath, KeyPrefix, Mutation, Namespace, PutRequest, StoreClient, StoreError,
    SyncToken, annotation_key, error::CodecSnafu as StoreCodecSnafu, global_settings_key,
    loadout_key, profile_kind_prefix, profile_link_key, profile_version_scope, search_key,
    search_prefix, settings_key,
};
use dim_sync_types::{
    AccountId, App, DestinyVersion, GlobalSettings, ItemAnnotation, ItemHashTag, ItemId, Loadout,
    ProfileComponent, ProfileId, ProfileRequest, ProfileResponse, ProfileUpdate, Search,
    SearchType, Settings, SettingsPatch, StoreKind, UpdateContext, UpdateResult, UserSnapshot,
    canonicalize_query, config::TransferConfig, decode, encode,
};
use snafu::{IntoError, ResultExt};
use tracing::{debug, warn};

use crate::{
    backend::{ImportStats, ProfileBackend},
    error::{GlobalStoreSnafu, KeySnafu, ProfileError, Result, StoreSnafu},
    kind::{StoredItem, search_digest},
    records::{SearchRecord, SettingsRecord, invalid},
};

/// Result of a typed sync read.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncDelta<T> {
    /// The complete collection; replaces whatever the caller held.
    Full(Vec<T>),
    /// Changes to merge into the caller's collection.
    Changes {
        /// Records created or updated.
        upserted: Vec<T>,
        /// Keys to drop, including keys changed outside the listed window.
        removed: Vec<KeyPath>,
    },
}

impl<T> SyncDelta<T> {
    /// Whether the delta replaces the whole collection.
    pub fn is_full(&self) -> bool {
        matches!(self, SyncDelta::Full(_))
    }
}

/// A typed sync result and the token superseding the one presented.
#[derive(Debug, Clone)]
pub struct Synced<T> {
    /// What changed.
    pub delta: SyncDelta<T>,
    /// Token for the next sync.
    pub token: SyncToken,
}

/// Profile adapter over a [`StoreClient`].
#[derive(Clone)]
pub struct ProfileStore {
    client: StoreClient,
    batch_delay: Duration,
}

impl ProfileStore {
    /// Creates an adapter pacing bulk writes per `transfer`.
    pub fn new(client: StoreClient, transfer: &TransferConfig) -> Self {
        Self { client, batch_delay: transfer.batch_delay }
    }

    /// The underlying client.
    pub fn client(&self) -> &StoreClient {
        &self.client
    }

    pub(crate) fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    // ------------------------------------------------------------------------
    // Typed reads with incremental sync
    // ------------------------------------------------------------------------

    /// Loadouts of a profile and version, in full or since `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::SyncTokenScopeMismatch`] if `token` was issued
    /// for another collection, or any store error.
    pub async fn get_loadouts_for_profile(
        &self,
        account: AccountId,
        profile: ProfileId,
        version: DestinyVersion,
        token: Option<&SyncToken>,
    ) -> Result<Synced<Loadout>> {
        let prefix = profile_kind_prefix(profile, version, Namespace::Loadout);
        self.synced(account, "get_loadouts", &prefix, token, |item| match item {
            StoredItem::Loadout { loadout, .. } => Some(loadout),
            _ => None,
        })
        .await
    }

    /// Item annotations of a profile and version, in full or since `token`.
    ///
    /// # Errors
    ///
    /// As [`get_loadouts_for_profile`](Self::get_loadouts_for_profile).
    pub async fn get_annotations_for_profile(
        &self,
        account: AccountId,
        profile: ProfileId,
        version: DestinyVersion,
        token: Option<&SyncToken>,
    ) -> Result<Synced<ItemAnnotation>> {
        let prefix = profile_kind_prefix(profile, version, Namespace::ItemAnnotation);
        self.synced(account, "get_annotations", &prefix, token, |item| match item {
            StoredItem::Annotation { annotation, .. } => Some(annotation),
            _ => None,
        })
        .await
    }

    /// Item hash tags of a profile, in full or since `token`.
    ///
    /// # Errors
    ///
    /// As [`get_loadouts_for_profile`](Self::get_loadouts_for_profile).
    pub async fn get_hash_tags_for_profile(
        &self,
        account: AccountId,
        profile: ProfileId,
        token: Option<&SyncToken>,
    ) -> Result<Synced<ItemHashTag>> {
        let prefix = profile_kind_prefix(profile, DestinyVersion::D2, Namespace::ItemHashTag);
        self.synced(account, "get_hash_tags", &prefix, token, |item| match item {
            StoredItem::HashTag { hash_tag, .. } => Some(hash_tag),
            _ => None,
        })
        .await
    }

    /// Tracked triumphs of a profile, in full or since `token`.
    ///
    /// # Errors
    ///
    /// As [`get_loadouts_for_profile`](Self::get_loadouts_for_profile).
    pub async fn get_triumphs_for_profile(
        &self,
        account: AccountId,
        profile: ProfileId,
        token: Option<&SyncToken>,
    ) -> Result<Synced<u32>> {
        let prefix = profile_kind_prefix(profile, DestinyVersion::D2, Namespace::Triumph);
        self.synced(account, "get_triumphs", &prefix, token, |item| match item {
            StoredItem::Triumph { record_hash, .. } => Some(record_hash),
            _ => None,
        })
        .await
    }

    /// Searches of an account and version, in full or since `token`.
    ///
    /// # Errors
    ///
    /// As [`get_loadouts_for_profile`](Self::get_loadouts_for_profile).
    pub async fn get_searches(
        &self,
        account: AccountId,
        version: DestinyVersion,
        token: Option<&SyncToken>,
    ) -> Result<Synced<Search>> {
        let prefix = search_prefix(account, version);
        self.synced(account, "get_searches", &prefix, token, |item| match item {
            StoredItem::Search { search, .. } => Some(search),
            _ => None,
        })
        .await
    }

    async fn synced<T>(
        &self,
        account: AccountId,
        operation: &'static str,
        prefix: &KeyPrefix,
        token: Option<&SyncToken>,
        pick: fn(StoredItem) -> Option<T>,
    ) -> Result<Synced<T>> {
        let Some(token) = token else {
            return self.full(account, operation, prefix, pick).await;
        };

        let page = self
            .client
            .sync_list(prefix, token)
            .await
            .map_err(|source| sync_error(account, operation, source))?;
        if page.events.iter().any(|event| matches!(event, ChangeEvent::Reset)) {
            debug!(account = %account, prefix = %prefix, "sync token expired, relisting");
            return self.full(account, operation, prefix, pick).await;
        }

        let mut upserted = Vec::new();
        let mut removed = Vec::new();
        for event in page.events {
            match event {
                ChangeEvent::Changed(doc) => upserted.extend(pick(StoredItem::decode(&doc)?)),
                ChangeEvent::Deleted(key) | ChangeEvent::UpdatedOutsideWindow(key) => {
                    removed.push(key);
                },
                ChangeEvent::Reset => {},
            }
        }
        Ok(Synced { delta: SyncDelta::Changes { upserted, removed }, token: page.token })
    }

    /// Changes in `scope` since `token`, or the whole scope as changes when
    /// there is no usable token. The flag tells which one the caller got.
    async fn scope_events(
        &self,
        account: AccountId,
        scope: &KeyPrefix,
        token: Option<&SyncToken>,
    ) -> Result<(Vec<ChangeEvent>, SyncToken, bool)> {
        if let Some(token) = token {
            let page = self
                .client
                .sync_list(scope, token)
                .await
                .map_err(|source| sync_error(account, "read_profile", source))?;
            let relist = page
                .events
                .iter()
                .any(|event| matches!(event, ChangeEvent::Reset | ChangeEvent::UpdatedOutsideWindow(_)));
            if !relist {
                return Ok((page.events, page.token, true));
            }
            debug!(account = %account, prefix = %scope, "sync token unusable, relisting");
        }
        let page =
            self.client.begin_list(scope, None).await.context(StoreSnafu { account, operation: "read_profile" })?;
        Ok((page.documents.into_iter().map(ChangeEvent::Changed).collect(), page.token, false))
    }

    async fn full<T>(
        &self,
        account: AccountId,
        operation: &'static str,
        prefix: &KeyPrefix,
        pick: fn(StoredItem) -> Option<T>,
    ) -> Result<Synced<T>> {
        let page = self.client.begin_list(prefix, None).await.context(StoreSnafu { account, operation })?;
        let items = decode_all(&page.documents)?.into_iter().filter_map(pick).collect();
        Ok(Synced { delta: SyncDelta::Full(items), token: page.token })
    }

    // ------------------------------------------------------------------------
    // Global records
    // ------------------------------------------------------------------------

    /// Service-wide settings for `stage`, defaults if none are stored.
    ///
    /// Reads with the stale-read allowance, so a slow store cannot hold up
    /// every request that needs these flags.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::GlobalStore`] on store failure or timeout.
    pub async fn get_global_settings(&self, stage: &str) -> Result<GlobalSettings> {
        let key = global_settings_key(stage).context(KeySnafu)?;
        let doc = self
            .client
            .get_stale(&key)
            .await
            .context(GlobalStoreSnafu { operation: "get_global_settings" })?;
        match doc.as_ref().map(StoredItem::decode).transpose()? {
            Some(StoredItem::GlobalSettings { settings, .. }) => Ok(settings),
            Some(other) => Err(ProfileError::UnrecognizedKey { key: other.key()?.to_string() }),
            None => Ok(GlobalSettings::default()),
        }
    }

    /// Replaces the service-wide settings for `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::GlobalStore`] on store failure.
    pub async fn put_global_settings(&self, stage: &str, settings: &GlobalSettings) -> Result<()> {
        let item = StoredItem::GlobalSettings { stage: stage.to_string(), settings: settings.clone() };
        self.client
            .put_many(&[item.to_put()?], Duration::ZERO)
            .await
            .context(GlobalStoreSnafu { operation: "put_global_settings" })?;
        Ok(())
    }

    /// Every registered app.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::GlobalStore`] on store failure.
    pub async fn list_apps(&self) -> Result<Vec<App>> {
        let docs = self
            .client
            .list_all(&dim_sync_store::apps_prefix())
            .await
            .context(GlobalStoreSnafu { operation: "list_apps" })?;
        Ok(decode_all(&docs)?
            .into_iter()
            .filter_map(|item| match item {
                StoredItem::App(app) => Some(app),
                _ => None,
            })
            .collect())
    }

    /// Registers a new app. App ids are never reused.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::GlobalStore`] wrapping
    /// [`StoreError::AlreadyExists`] if the id is taken.
    pub async fn register_app(&self, app: &App) -> Result<()> {
        let put = StoredItem::App(app.clone()).to_put()?.must_not_exist();
        self.client
            .put_many(&[put], Duration::ZERO)
            .await
            .context(GlobalStoreSnafu { operation: "register_app" })?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------------

    async fn apply_update(&self, context: &UpdateContext, update: &ProfileUpdate) -> Result<()> {
        let account = context.account;
        let version = context.destiny_version;
        match update {
            ProfileUpdate::Setting(patch) => self.update_settings(account, patch).await,
            ProfileUpdate::Loadout(loadout) => {
                let profile = require_profile(context, update)?;
                let item = StoredItem::Loadout { profile, version, loadout: loadout.clone() };
                self.put_item(account, "update_loadout", &item).await
            },
            ProfileUpdate::DeleteLoadout(id) => {
                let profile = require_profile(context, update)?;
                self.delete_keys(account, "delete_loadout", &[loadout_key(profile, version, *id)])
                    .await
            },
            ProfileUpdate::Tag(annotation) => {
                let profile = require_profile(context, update)?;
                let item = StoredItem::annotation(profile, version, annotation.clone())?;
                if annotation.is_empty() {
                    self.delete_keys(account, "delete_tag", &[item.key()?]).await
                } else {
                    self.put_item(account, "update_tag", &item).await
                }
            },
            ProfileUpdate::TagCleanup(ids) => {
                let profile = require_profile(context, update)?;
                let keys: Vec<KeyPath> = ids
                    .iter()
                    .filter_map(|id| match id.parse::<ItemId>() {
                        Ok(item) => Some(annotation_key(profile, version, item)),
                        Err(_) => {
                            warn!(account = %account, id = %id, "skipping invalid item id in tag cleanup");
                            None
                        },
                    })
                    .collect();
                self.delete_keys(account, "tag_cleanup", &keys).await
            },
            ProfileUpdate::ItemHashTag(hash_tag) => {
                let profile = require_profile(context, update)?;
                let item = StoredItem::hash_tag(profile, hash_tag.clone())?;
                if hash_tag.is_empty() {
                    self.delete_keys(account, "delete_hash_tag", &[item.key()?]).await
                } else {
                    self.put_item(account, "update_hash_tag", &item).await
                }
            },
            ProfileUpdate::TrackTriumph { record_hash, tracked } => {
                let profile = require_profile(context, update)?;
                let item = StoredItem::triumph(profile, *record_hash)?;
                if *tracked {
                    self.put_item(account, "track_triumph", &item).await
                } else {
                    self.delete_keys(account, "untrack_triumph", &[item.key()?]).await
                }
            },
            ProfileUpdate::Search { query, search_type } => {
                self.record_search(account, version, query, *search_type).await
            },
            ProfileUpdate::SaveSearch { query, search_type, saved } => {
                self.save_search(account, version, query, *search_type, *saved).await
            },
            ProfileUpdate::DeleteSearch { query, search_type } => {
                let key = search_document_key(account, version, query, *search_type)?;
                self.delete_keys(account, "delete_search", &[key]).await
            },
        }
    }

    async fn update_settings(&self, account: AccountId, patch: &SettingsPatch) -> Result<()> {
        let key = settings_key(account);
        let key_name = key.to_string();
        self.client
            .update(&key, |current| {
                let mut settings = match current {
                    Some(doc) => Settings::from(
                        decode::<SettingsRecord>(&doc.value)
                            .context(StoreCodecSnafu { key: key_name.as_str() })?,
                    ),
                    None => Settings::default(),
                };
                patch.apply(&mut settings);
                let bytes = encode(&SettingsRecord::from(&settings))
                    .context(StoreCodecSnafu { key: key_name.as_str() })?;
                Ok(Mutation::Put(bytes))
            })
            .await
            .context(StoreSnafu { account, operation: "update_settings" })?;
        Ok(())
    }

    async fn record_search(
        &self,
        account: AccountId,
        version: DestinyVersion,
        query: &str,
        search_type: SearchType,
    ) -> Result<()> {
        let canonical = canonical_query(query)?;
        let key = search_key(account, version, search_digest(search_type, &canonical));
        let key_name = key.to_string();
        self.client
            .update(&key, |current| {
                let mut record = match current {
                    Some(doc) => decode::<SearchRecord>(&doc.value)
                        .context(StoreCodecSnafu { key: key_name.as_str() })?,
                    None => SearchRecord {
                        query: canonical.clone(),
                        usage_count: 0,
                        saved: false,
                        last_usage_ms: 0,
                        search_type,
                    },
                };
                record.usage_count = record.usage_count.saturating_add(1);
                record.last_usage_ms = Utc::now().timestamp_millis();
                let bytes =
                    encode(&record).context(StoreCodecSnafu { key: key_name.as_str() })?;
                Ok(Mutation::Put(bytes))
            })
            .await
            .context(StoreSnafu { account, operation: "record_search" })?;
        Ok(())
    }

    async fn save_search(
        &self,
        account: AccountId,
        version: DestinyVersion,
        query: &str,
        search_type: SearchType,
        saved: bool,
    ) -> Result<()> {
        let canonical = canonical_query(query)?;
        let key = search_key(account, version, search_digest(search_type, &canonical));
        let key_name = key.to_string();
        self.client
            .update(&key, |current| {
                let record = match current {
                    Some(doc) => SearchRecord {
                        saved,
                        ..decode::<SearchRecord>(&doc.value)
                            .context(StoreCodecSnafu { key: key_name.as_str() })?
                    },
                    // Unsaving a search that was never recorded is a no-op.
                    None if !saved => return Ok(Mutation::Keep),
                    None => SearchRecord {
                        query: canonical.clone(),
                        usage_count: 1,
                        saved,
                        last_usage_ms: Utc::now().timestamp_millis(),
                        search_type,
                    },
                };
                let bytes =
                    encode(&record).context(StoreCodecSnafu { key: key_name.as_str() })?;
                Ok(Mutation::Put(bytes))
            })
            .await
            .context(StoreSnafu { account, operation: "save_search" })?;
        Ok(())
    }

    async fn put_item(
        &self,
        account: AccountId,
        operation: &'static str,
        item: &StoredItem,
    ) -> Result<()> {
        self.client
            .put_many(&[item.to_put()?], Duration::ZERO)
            .await
            .context(StoreSnafu { account, operation })?;
        Ok(())
    }

    pub(crate) async fn delete_keys(
        &self,
        account: AccountId,
        operation: &'static str,
        keys: &[KeyPath],
    ) -> Result<()> {
        self.client.delete_many(keys).await.context(StoreSnafu { account, operation })
    }
}

#[async_trait]
impl ProfileBackend for ProfileStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Document
    }

    async fn read_profile(&self, request: &ProfileRequest) -> Result<ProfileResponse> {
        let account = request.account;
        let mut response = ProfileResponse::default();

        if request.wants(ProfileComponent::Settings) {
            let doc = self
                .client
                .get(&settings_key(account))
                .await
                .context(StoreSnafu { account, operation: "read_settings" })?;
            response.settings = match doc.as_ref().map(StoredItem::decode).transpose()? {
                Some(StoredItem::Settings { settings, .. }) => Some(settings),
                _ => None,
            };
        }

        if request.components.iter().any(|c| c.is_profile_scoped()) {
            let profile = request
                .profile
                .ok_or(ProfileError::ProfileRequired { action: "read_profile" })?;
            let token = request
                .sync_token
                .as_deref()
                .map(SyncToken::from_base64)
                .transpose()
                .map_err(|source| sync_error(account, "read_profile", source))?;
            let scope = profile_version_scope(profile, request.destiny_version);
            let (events, token, incremental) =
                self.scope_events(account, &scope, token.as_ref()).await?;
            response.incremental = incremental;

            for event in events {
                let item = match event {
                    ChangeEvent::Changed(doc) => StoredItem::decode(&doc)?,
                    ChangeEvent::Deleted(key) => {
                        record_removal(request, &mut response, &key);
                        continue;
                    },
                    ChangeEvent::Reset | ChangeEvent::UpdatedOutsideWindow(_) => continue,
                };
                match item {
                    StoredItem::Loadout { loadout, .. } if request.wants(ProfileComponent::Loadouts) => {
                        response.loadouts.push(loadout);
                    },
                    StoredItem::Annotation { annotation, .. } if request.wants(ProfileComponent::Tags) => {
                        response.tags.push(annotation);
                    },
                    StoredItem::HashTag { hash_tag, .. } if request.wants(ProfileComponent::HashTags) => {
                        response.item_hash_tags.push(hash_tag);
                    },
                    StoredItem::Triumph { record_hash, .. } if request.wants(ProfileComponent::Triumphs) => {
                        response.triumphs.push(record_hash);
                    },
                    _ => {},
                }
            }
            response.sync_token = Some(token.to_base64());
        }

        if request.wants(ProfileComponent::Searches) {
            let docs = self
                .client
                .list_all(&search_prefix(account, request.destiny_version))
                .await
                .context(StoreSnafu { account, operation: "read_searches" })?;
            response.searches = decode_all(&docs)?
                .into_iter()
                .filter_map(|item| match item {
                    StoredItem::Search { search, .. } => Some(search),
                    _ => None,
                })
                .collect();
        }

        Ok(response)
    }

    async fn apply_updates(
        &self,
        context: &UpdateContext,
        updates: &[ProfileUpdate],
    ) -> Result<Vec<UpdateResult>> {
        let account = context.account;
        if let Some(profile) = context.profile {
            if updates.iter().any(is_profile_scoped) {
                let link = PutRequest::new(profile_link_key(account, profile), Vec::new());
                self.client
                    .put_many(&[link], Duration::ZERO)
                    .await
                    .context(StoreSnafu { account, operation: "link_profile" })?;
            }
        }

        let mut results = Vec::with_capacity(updates.len());
        for update in updates {
            match self.apply_update(context, update).await {
                Ok(()) => results.push(UpdateResult::Success),
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => {
                    warn!(account = %account, action = update.action(), error = %err, "update rejected");
                    results.push(UpdateResult::failed(err.to_string()));
                },
            }
        }
        Ok(results)
    }

    async fn export_user(&self, account: AccountId) -> Result<UserSnapshot> {
        self.export_snapshot(account).await
    }

    async fn import_user(
        &self,
        account: AccountId,
        snapshot: &UserSnapshot,
    ) -> Result<ImportStats> {
        self.import_snapshot(account, snapshot).await
    }

    async fn delete_all_data(&self, account: AccountId) -> Result<usize> {
        self.wipe_account(account, &[]).await
    }

    async fn count_records(&self, account: AccountId) -> Result<usize> {
        let docs = self.account_documents(account, &[]).await?;
        Ok(docs
            .iter()
            .filter(|doc| doc.key.leaf().map(|leaf| leaf.namespace()) != Some(Namespace::Profile))
            .count())
    }
}

/// Decodes listed documents, failing on the first unreadable one.
pub(crate) fn decode_all(docs: &[dim_sync_store::Document]) -> Result<Vec<StoredItem>> {
    docs.iter().map(StoredItem::decode).collect()
}

/// Adds a removed profile-scoped document to the matching `deleted_*` list.
fn record_removal(request: &ProfileRequest, response: &mut ProfileResponse, key: &KeyPath) {
    let Some(leaf) = key.leaf() else { return };
    match (leaf.namespace(), leaf.id()) {
        (Namespace::Loadout, KeyId::Uuid(id)) if request.wants(ProfileComponent::Loadouts) => {
            response.deleted_loadout_ids.push(*id);
        },
        (Namespace::ItemAnnotation, KeyId::Int(item)) if request.wants(ProfileComponent::Tags) => {
            response.deleted_tags_ids.push(item.to_string());
        },
        (Namespace::ItemHashTag, KeyId::Int(hash)) if request.wants(ProfileComponent::HashTags) => {
            response.deleted_item_hash_tag_hashes.extend(u32::try_from(*hash).ok());
        },
        (Namespace::Triumph, KeyId::Int(hash)) if request.wants(ProfileComponent::Triumphs) => {
            response.deleted_triumphs.extend(u32::try_from(*hash).ok());
        },
        _ => {},
    }
}

fn require_profile(context: &UpdateContext, update: &ProfileUpdate) -> Result<ProfileId> {
    context.profile.ok_or(ProfileError::ProfileRequired { action: update.action() })
}

fn is_profile_scoped(update: &ProfileUpdate) -> bool {
    !matches!(
        update,
        ProfileUpdate::Setting(_)
            | ProfileUpdate::Search { .. }
            | ProfileUpdate::SaveSearch { .. }
            | ProfileUpdate::DeleteSearch { .. }
    )
}

fn canonical_query(query: &str) -> Result<String> {
    let canonical = canonicalize_query(query);
    if canonical.is_empty() {
        return Err(invalid("search", "query is empty"));
    }
    Ok(canonical)
}

fn search_document_key(
    account: AccountId,
    version: DestinyVersion,
    query: &str,
    search_type: SearchType,
) -> Result<KeyPath> {
    Ok(search_key(account, version, search_digest(search_type, &canonical_query(query)?)))
}

fn sync_error(account: AccountId, operation: &'static str, source: StoreError) -> ProfileError {
    match source {
        StoreError::TokenScopeMismatch { issued_for, requested } => {
            ProfileError::SyncTokenScopeMismatch { issued_for, requested }
        },
        other => StoreSnafu { account, operation }.into_error(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use dim_sync_store::InMemoryDocumentStore;
    use dim_sync_types::{
        TagValue,
        config::{ConflictRetryConfig, StoreConfig},
    };

    use super::*;

    const ACCOUNT: AccountId = AccountId::new(4321);
    const PROFILE: ProfileId = ProfileId::new(4611686018467284386);

    fn setup() -> (Arc<InMemoryDocumentStore>, ProfileStore) {
        let memory = Arc::new(InMemoryDocumentStore::new(&StoreConfig::default()));
        let retry = ConflictRetryConfig::builder()
            .min_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(2))
            .build()
            .expect("retry config");
        let client = StoreClient::new(memory.clone(), StoreConfig::default(), &retry);
        let transfer = TransferConfig::builder().batch_delay(Duration::ZERO).build().expect("transfer");
        (memory, ProfileStore::new(client, &transfer))
    }

    fn context() -> UpdateContext {
        UpdateContext { account: ACCOUNT, profile: Some(PROFILE), destiny_version: DestinyVersion::D2 }
    }

    fn tag(id: &str, tag: Option<TagValue>) -> ProfileUpdate {
        ProfileUpdate::Tag(ItemAnnotation { id: id.into(), tag, notes: None, crafted_date: None })
    }

    #[tokio::test]
    async fn test_updates_and_full_read() {
        let (_, store) = setup();
        let patch = SettingsPatch { item_size: Some(42), ..SettingsPatch::default() };
        let results = store
            .apply_updates(
                &context(),
                &[
                    ProfileUpdate::Setting(patch),
                    tag("100", Some(TagValue::Favorite)),
                    ProfileUpdate::TrackTriumph { record_hash: -1, tracked: true },
                    ProfileUpdate::Search { query: " is:weapon  ".into(), search_type: SearchType::Item },
                    ProfileUpdate::Search { query: "is:weapon".into(), search_type: SearchType::Item },
                ],
            )
            .await
            .expect("apply");
        assert!(results.iter().all(UpdateResult::is_success), "{results:?}");

        let response = store
            .read_profile(&ProfileRequest::full(ACCOUNT, PROFILE, DestinyVersion::D2))
            .await
            .expect("read");
        assert_eq!(response.settings.expect("settings").item_size, 42);
        assert_eq!(response.tags.len(), 1);
        assert_eq!(response.triumphs, vec![u32::MAX]);
        assert_eq!(response.searches.len(), 1);
        assert_eq!(response.searches[0].usage_count, 2);
        assert_eq!(response.searches[0].query, "is:weapon");
        assert!(response.sync_token.is_some());
    }

    #[tokio::test]
    async fn test_empty_annotation_deletes() {
        let (memory, store) = setup();
        store.apply_updates(&context(), &[tag("7", Some(TagValue::Junk))]).await.expect("tag");
        store.apply_updates(&context(), &[tag("7", None)]).await.expect("clear");
        let synced = store
            .get_annotations_for_profile(ACCOUNT, PROFILE, DestinyVersion::D2, None)
            .await
            .expect("read");
        assert_eq!(synced.delta, SyncDelta::Full(Vec::new()));
        // Only the profile link remains.
        assert_eq!(memory.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_action_does_not_stop_batch() {
        let (_, store) = setup();
        let results = store
            .apply_updates(
                &context(),
                &[
                    tag("not-a-number", Some(TagValue::Keep)),
                    ProfileUpdate::TrackTriumph { record_hash: i64::MAX, tracked: true },
                    tag("8", Some(TagValue::Keep)),
                ],
            )
            .await
            .expect("apply");
        assert!(!results[0].is_success());
        assert!(!results[1].is_success());
        assert!(results[2].is_success());
    }

    #[tokio::test]
    async fn test_profile_action_without_profile_fails() {
        let (_, store) = setup();
        let context = UpdateContext { profile: None, ..context() };
        let results = store
            .apply_updates(&context, &[tag("8", Some(TagValue::Keep))])
            .await
            .expect("apply");
        assert_eq!(
            results,
            vec![UpdateResult::failed("tag requires a platform membership id")]
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_the_batch() {
        let (memory, store) = setup();
        memory.faults().inject_unavailable(1);
        let err = store
            .apply_updates(&context(), &[ProfileUpdate::DeleteSearch {
                query: "x".into(),
                search_type: SearchType::Item,
            }])
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_incremental_sync_of_loadouts() {
        let (_, store) = setup();
        let loadout = |name: &str| -> Loadout {
            serde_json::from_value(serde_json::json!({"id": uuid::Uuid::new_v4(), "name": name}))
                .expect("loadout")
        };
        let first = loadout("first");
        store.apply_updates(&context(), &[ProfileUpdate::Loadout(first.clone())]).await.expect("put");

        let initial = store
            .get_loadouts_for_profile(ACCOUNT, PROFILE, DestinyVersion::D2, None)
            .await
            .expect("list");
        assert!(initial.delta.is_full());

        let second = loadout("second");
        store
            .apply_updates(&context(), &[
                ProfileUpdate::Loadout(second.clone()),
                ProfileUpdate::DeleteLoadout(first.id),
            ])
            .await
            .expect("update");

        let synced = store
            .get_loadouts_for_profile(ACCOUNT, PROFILE, DestinyVersion::D2, Some(&initial.token))
            .await
            .expect("sync");
        let SyncDelta::Changes { upserted, removed } = synced.delta else {
            panic!("expected changes")
        };
        assert_eq!(upserted.len(), 1);
        assert_eq!(upserted[0].id, second.id);
        assert_eq!(removed, vec![loadout_key(PROFILE, DestinyVersion::D2, first.id)]);
    }

    #[tokio::test]
    async fn test_expired_token_relists() {
        let (memory, store) = setup();
        let initial = store.get_triumphs_for_profile(ACCOUNT, PROFILE, None).await.expect("list");
        store
            .apply_updates(&context(), &[ProfileUpdate::TrackTriumph { record_hash: 5, tracked: true }])
            .await
            .expect("track");
        memory.truncate_change_log();

        let synced = store
            .get_triumphs_for_profile(ACCOUNT, PROFILE, Some(&initial.token))
            .await
            .expect("sync");
        assert_eq!(synced.delta, SyncDelta::Full(vec![5]));
    }

    #[tokio::test]
    async fn test_read_profile_with_token_returns_changes() {
        let (memory, store) = setup();
        store
            .apply_updates(&context(), &[
                tag("100", Some(TagValue::Favorite)),
                tag("101", Some(TagValue::Junk)),
                ProfileUpdate::TrackTriumph { record_hash: 9, tracked: true },
            ])
            .await
            .expect("seed");
        let request = ProfileRequest::full(ACCOUNT, PROFILE, DestinyVersion::D2);
        let full = store.read_profile(&request).await.expect("full read");
        assert!(!full.incremental);
        assert_eq!(full.tags.len(), 2);
        let token = full.sync_token.expect("token");

        store
            .apply_updates(&context(), &[
                tag("102", Some(TagValue::Keep)),
                tag("101", None),
                ProfileUpdate::TrackTriumph { record_hash: 9, tracked: false },
            ])
            .await
            .expect("update");

        let delta = store.read_profile(&request.clone().since(token.clone())).await.expect("delta");
        assert!(delta.incremental);
        assert_eq!(delta.tags.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec!["102"]);
        assert_eq!(delta.deleted_tags_ids, vec!["101".to_string()]);
        assert!(delta.triumphs.is_empty());
        assert_eq!(delta.deleted_triumphs, vec![9]);
        assert!(delta.loadouts.is_empty());
        assert_ne!(delta.sync_token.as_deref(), Some(token.as_str()));

        // Nothing changed since the newest token.
        let quiet = store
            .read_profile(&request.clone().since(delta.sync_token.expect("token")))
            .await
            .expect("quiet");
        assert!(quiet.incremental);
        assert!(quiet.tags.is_empty() && quiet.deleted_tags_ids.is_empty());

        // An expired token falls back to a full read.
        memory.truncate_change_log();
        let relisted = store.read_profile(&request.since(token)).await.expect("relist");
        assert!(!relisted.incremental);
        assert_eq!(relisted.tags.len(), 2);
    }

    #[tokio::test]
    async fn test_read_profile_rejects_garbage_token() {
        let (_, store) = setup();
        let request = ProfileRequest::full(ACCOUNT, PROFILE, DestinyVersion::D2).since("***");
        let err = store.read_profile(&request).await.unwrap_err();
        assert_eq!(err.code(), dim_sync_types::ErrorCode::InvalidSyncToken);
    }

    #[tokio::test]
    async fn test_token_for_other_collection_is_rejected() {
        let (_, store) = setup();
        let tags = store.get_hash_tags_for_profile(ACCOUNT, PROFILE, None).await.expect("list");
        let err = store
            .get_triumphs_for_profile(ACCOUNT, PROFILE, Some(&tags.token))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::SyncTokenScopeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_save_search_semantics() {
        let (_, store) = setup();
        let save = |saved| ProfileUpdate::SaveSearch {
            query: "tag:junk".into(),
            search_type: SearchType::Item,
            saved,
        };
        store.apply_updates(&context(), &[save(false)]).await.expect("unsave");
        let empty = store.get_searches(ACCOUNT, DestinyVersion::D2, None).await.expect("read");
        assert_eq!(empty.delta, SyncDelta::Full(Vec::new()));

        store.apply_updates(&context(), &[save(true)]).await.expect("save");
        let SyncDelta::Full(searches) =
            store.get_searches(ACCOUNT, DestinyVersion::D2, None).await.expect("read").delta
        else {
            panic!("expected full")
        };
        assert!(searches[0].saved);
        assert_eq!(searches[0].usage_count, 1);
    }

    #[tokio::test]
    async fn test_global_settings_default_and_overwrite() {
        let (_, store) = setup();
        assert_eq!(store.get_global_settings("dev").await.expect("read"), GlobalSettings::default());
        let settings = GlobalSettings { show_issue_banner: true, ..GlobalSettings::default() };
        store.put_global_settings("dev", &settings).await.expect("write");
        let read = store.get_global_settings("dev").await.expect("read");
        assert!(read.show_issue_banner);
        assert!(read.last_updated.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_settings_read_is_bounded() {
        let (memory, store) = setup();
        memory.faults().inject_delay(60_000);
        let err = store.get_global_settings("dev").await.unwrap_err();
        assert!(matches!(err, ProfileError::GlobalStore { source: StoreError::Timeout { .. }, .. }));
    }
}
