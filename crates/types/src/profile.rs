//! Profile read requests, update actions and their results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    domain::{ItemAnnotation, ItemHashTag, Loadout, Search, SearchType, Settings, SettingsPatch},
    types::{AccountId, DestinyVersion, ProfileId},
};

/// Parts of a profile a reader can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileComponent {
    /// Account settings.
    Settings,
    /// Loadouts for the profile and version.
    Loadouts,
    /// Item annotations for the profile and version.
    Tags,
    /// Item hash tags for the profile.
    HashTags,
    /// Tracked triumphs for the profile.
    Triumphs,
    /// Recent and saved searches for the account and version.
    Searches,
}

impl ProfileComponent {
    /// Every component, in response order.
    pub const ALL: [ProfileComponent; 6] = [
        ProfileComponent::Settings,
        ProfileComponent::Loadouts,
        ProfileComponent::Tags,
        ProfileComponent::HashTags,
        ProfileComponent::Triumphs,
        ProfileComponent::Searches,
    ];

    /// Whether the component is scoped to a profile rather than the account.
    pub const fn is_profile_scoped(self) -> bool {
        matches!(self, Self::Loadouts | Self::Tags | Self::HashTags | Self::Triumphs)
    }
}

/// A profile read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRequest {
    /// Account making the request.
    pub account: AccountId,
    /// Profile to read; required for profile-scoped components.
    pub profile: Option<ProfileId>,
    /// Game version.
    pub destiny_version: DestinyVersion,
    /// Components to return.
    pub components: Vec<ProfileComponent>,
    /// Token from an earlier response. Stores that issue tokens then return
    /// only what changed in the profile-scoped components; stores that do not
    /// ignore it.
    pub sync_token: Option<String>,
}

impl ProfileRequest {
    /// Requests every component of a profile.
    pub fn full(account: AccountId, profile: ProfileId, destiny_version: DestinyVersion) -> Self {
        Self {
            account,
            profile: Some(profile),
            destiny_version,
            components: ProfileComponent::ALL.to_vec(),
            sync_token: None,
        }
    }

    /// Asks for changes since `token` instead of full profile-scoped lists.
    #[must_use]
    pub fn since(mut self, token: impl Into<String>) -> Self {
        self.sync_token = Some(token.into());
        self
    }

    /// Whether the component was requested.
    pub fn wants(&self, component: ProfileComponent) -> bool {
        self.components.contains(&component)
    }
}

/// Profile read result. Components that were not requested stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    /// Account settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    /// Loadouts.
    #[serde(default)]
    pub loadouts: Vec<Loadout>,
    /// Item annotations.
    #[serde(default)]
    pub tags: Vec<ItemAnnotation>,
    /// Item hash tags.
    #[serde(default)]
    pub item_hash_tags: Vec<ItemHashTag>,
    /// Tracked triumph record hashes.
    #[serde(default)]
    pub triumphs: Vec<u32>,
    /// Searches.
    #[serde(default)]
    pub searches: Vec<Search>,
    /// Opaque incremental-sync token, when the owning store issues them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Whether the profile-scoped lists hold only changes since the request's
    /// token. Merge them and apply the `deleted_*` lists; otherwise replace.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incremental: bool,
    /// Loadouts removed since the token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_loadout_ids: Vec<Uuid>,
    /// Item instance ids whose annotations were removed since the token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_tags_ids: Vec<String>,
    /// Item hashes whose hash tags were removed since the token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_item_hash_tag_hashes: Vec<u32>,
    /// Triumphs untracked since the token.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_triumphs: Vec<u32>,
}

/// Identifies which profile and version an update batch applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateContext {
    /// Account making the updates.
    pub account: AccountId,
    /// Profile the profile-scoped updates target.
    pub profile: Option<ProfileId>,
    /// Game version.
    pub destiny_version: DestinyVersion,
}

/// One write action against a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload", rename_all = "snake_case")]
pub enum ProfileUpdate {
    /// Merge settings.
    Setting(SettingsPatch),
    /// Create or replace a loadout.
    Loadout(Loadout),
    /// Delete a loadout by id.
    DeleteLoadout(Uuid),
    /// Set or clear an item annotation.
    Tag(ItemAnnotation),
    /// Delete annotations for items that no longer exist.
    TagCleanup(Vec<String>),
    /// Set or clear an item hash tag.
    ItemHashTag(ItemHashTag),
    /// Track or untrack a triumph.
    TrackTriumph {
        /// Record hash, possibly sign-extended.
        record_hash: i64,
        /// `true` to track, `false` to untrack.
        tracked: bool,
    },
    /// Record one use of a search query.
    Search {
        /// The query text.
        query: String,
        /// What the query filters.
        #[serde(default)]
        search_type: SearchType,
    },
    /// Pin or unpin a search query.
    SaveSearch {
        /// The query text.
        query: String,
        /// What the query filters.
        #[serde(default)]
        search_type: SearchType,
        /// Pinned state.
        saved: bool,
    },
    /// Forget a search query.
    DeleteSearch {
        /// The query text.
        query: String,
        /// What the query filters.
        #[serde(default)]
        search_type: SearchType,
    },
}

impl ProfileUpdate {
    /// Short action name used in logs.
    pub const fn action(&self) -> &'static str {
        match self {
            ProfileUpdate::Setting(_) => "setting",
            ProfileUpdate::Loadout(_) => "loadout",
            ProfileUpdate::DeleteLoadout(_) => "delete_loadout",
            ProfileUpdate::Tag(_) => "tag",
            ProfileUpdate::TagCleanup(_) => "tag_cleanup",
            ProfileUpdate::ItemHashTag(_) => "item_hash_tag",
            ProfileUpdate::TrackTriumph { .. } => "track_triumph",
            ProfileUpdate::Search { .. } => "search",
            ProfileUpdate::SaveSearch { .. } => "save_search",
            ProfileUpdate::DeleteSearch { .. } => "delete_search",
        }
    }
}

/// Outcome of one [`ProfileUpdate`]. A failed action does not fail the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum UpdateResult {
    /// The action was applied.
    Success,
    /// The action was rejected or could not be applied.
    Failed {
        /// Why the action failed.
        message: String,
    },
}

impl UpdateResult {
    /// Builds a failure result.
    pub fn failed(message: impl Into<String>) -> Self {
        UpdateResult::Failed { message: message.into() }
    }

    /// Whether the action was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, UpdateResult::Success)
    }
}

/// Removes duplicate whitespace so equivalent queries share one record.
pub fn canonicalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_update_wire_format() {
        let json = r#"{"action": "track_triumph", "payload": {"record_hash": -5, "tracked": true}}"#;
        let update: ProfileUpdate = serde_json::from_str(json).expect("deserialize");
        assert_eq!(update, ProfileUpdate::TrackTriumph { record_hash: -5, tracked: true });
        assert_eq!(update.action(), "track_triumph");
    }

    #[test]
    fn test_canonicalize_query() {
        assert_eq!(canonicalize_query("  is:weapon   tag:junk "), "is:weapon tag:junk");
        assert_eq!(canonicalize_query(""), "");
    }

    #[test]
    fn test_full_request_wants_everything() {
        let request =
            ProfileRequest::full(AccountId::new(1), ProfileId::new(2), DestinyVersion::D2);
        assert!(ProfileComponent::ALL.iter().all(|c| request.wants(*c)));
    }

    #[test]
    fn test_delta_fields_only_serialized_when_set() {
        let full = serde_json::to_value(ProfileResponse::default()).expect("serialize");
        assert_eq!(full, serde_json::json!({"loadouts": [], "tags": [], "itemHashTags": [], "triumphs": [], "searches": []}));

        let delta = ProfileResponse {
            incremental: true,
            deleted_item_hash_tag_hashes: vec![u32::MAX],
            ..ProfileResponse::default()
        };
        let json = serde_json::to_value(&delta).expect("serialize");
        assert_eq!(json["incremental"], true);
        assert_eq!(json["deletedItemHashTagHashes"], serde_json::json!([4294967295u32]));
        let back: ProfileResponse = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, delta);
    }

    #[test]
    fn test_since_carries_token() {
        let request = ProfileRequest::full(AccountId::new(1), ProfileId::new(2), DestinyVersion::D2);
        assert!(request.sync_token.is_none());
        assert_eq!(request.since("abc").sync_token.as_deref(), Some("abc"));
    }
}
