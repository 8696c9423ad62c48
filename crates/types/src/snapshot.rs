//! Full-account export format.
//!
//! A [`UserSnapshot`] is everything one account owns, in either store. It is
//! the unit of bulk transfer, backup and restore.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ItemAnnotation, ItemHashTag, Loadout, Search, Settings},
    types::{DestinyVersion, ProfileId, normalize_hash},
};

/// A loadout with the profile and version it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedLoadout {
    /// Owning profile.
    pub platform_membership_id: ProfileId,
    /// Game version.
    pub destiny_version: DestinyVersion,
    /// The loadout.
    pub loadout: Loadout,
}

/// An item annotation with the profile and version it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedAnnotation {
    /// Owning profile.
    pub platform_membership_id: ProfileId,
    /// Game version.
    pub destiny_version: DestinyVersion,
    /// The annotation.
    pub annotation: ItemAnnotation,
}

/// An item hash tag with the profile it belongs to. Hash tags are Destiny 2 only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedHashTag {
    /// Owning profile.
    pub platform_membership_id: ProfileId,
    /// The hash tag.
    pub hash_tag: ItemHashTag,
}

/// Tracked triumphs of one profile. Triumphs are Destiny 2 only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedTriumphs {
    /// Owning profile.
    pub platform_membership_id: ProfileId,
    /// Tracked record hashes, possibly sign-extended.
    pub triumphs: Vec<i64>,
}

/// A search with the version it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedSearch {
    /// Game version.
    pub destiny_version: DestinyVersion,
    /// The search.
    pub search: Search,
}

/// Everything one account owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    /// Account settings, if ever saved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
    /// Loadouts across all profiles.
    #[serde(default)]
    pub loadouts: Vec<ExportedLoadout>,
    /// Item annotations across all profiles.
    #[serde(default)]
    pub tags: Vec<ExportedAnnotation>,
    /// Item hash tags across all profiles.
    #[serde(default)]
    pub item_hash_tags: Vec<ExportedHashTag>,
    /// Tracked triumphs per profile.
    #[serde(default)]
    pub triumphs: Vec<ExportedTriumphs>,
    /// Searches across versions.
    #[serde(default)]
    pub searches: Vec<ExportedSearch>,
}

impl UserSnapshot {
    /// Whether the account owns nothing.
    pub fn is_empty(&self) -> bool {
        self.settings.is_none()
            && self.loadouts.is_empty()
            && self.tags.is_empty()
            && self.item_hash_tags.is_empty()
            && self.triumphs.iter().all(|t| t.triumphs.is_empty())
            && self.searches.is_empty()
    }

    /// Number of records in the snapshot, counting each tracked triumph once.
    pub fn record_count(&self) -> usize {
        usize::from(self.settings.is_some())
            + self.loadouts.len()
            + self.tags.len()
            + self.item_hash_tags.len()
            + self.triumphs.iter().map(|t| t.triumphs.len()).sum::<usize>()
            + self.searches.len()
    }

    /// Returns a canonical copy for comparing snapshots taken from different stores.
    ///
    /// Sorts every collection, clears timestamps, drops unrecognized fields,
    /// canonicalizes hashes and merges per-profile triumph lists.
    pub fn normalized(&self) -> UserSnapshot {
        let canonical = |hash: i64| normalize_hash(hash).map(i64::from).unwrap_or(hash);

        let settings = self.settings.clone().map(|mut s| {
            s.extra.clear();
            s
        });

        let mut loadouts: Vec<ExportedLoadout> = self
            .loadouts
            .iter()
            .cloned()
            .map(|mut l| {
                l.loadout.created_at = None;
                l.loadout.last_updated_at = None;
                l.loadout.extra.clear();
                for item in l.loadout.equipped.iter_mut().chain(l.loadout.unequipped.iter_mut()) {
                    item.hash = canonical(item.hash);
                    item.extra.clear();
                }
                l
            })
            .collect();
        loadouts.sort_by(|a, b| {
            (a.platform_membership_id, a.destiny_version, a.loadout.id).cmp(&(
                b.platform_membership_id,
                b.destiny_version,
                b.loadout.id,
            ))
        });

        let mut tags = self.tags.clone();
        tags.sort_by(|a, b| {
            (a.platform_membership_id, a.destiny_version, &a.annotation.id).cmp(&(
                b.platform_membership_id,
                b.destiny_version,
                &b.annotation.id,
            ))
        });

        let mut item_hash_tags: Vec<ExportedHashTag> = self
            .item_hash_tags
            .iter()
            .cloned()
            .map(|mut t| {
                t.hash_tag.hash = canonical(t.hash_tag.hash);
                t
            })
            .collect();
        item_hash_tags.sort_by_key(|t| (t.platform_membership_id, t.hash_tag.hash));

        let mut by_profile: std::collections::BTreeMap<ProfileId, Vec<i64>> =
            std::collections::BTreeMap::new();
        for entry in &self.triumphs {
            by_profile
                .entry(entry.platform_membership_id)
                .or_default()
                .extend(entry.triumphs.iter().copied().map(canonical));
        }
        let triumphs = by_profile
            .into_iter()
            .filter_map(|(platform_membership_id, mut triumphs)| {
                triumphs.sort_unstable();
                triumphs.dedup();
                (!triumphs.is_empty())
                    .then_some(ExportedTriumphs { platform_membership_id, triumphs })
            })
            .collect();

        let mut searches: Vec<ExportedSearch> = self
            .searches
            .iter()
            .cloned()
            .map(|mut s| {
                s.search.last_usage = DateTime::<Utc>::UNIX_EPOCH;
                s
            })
            .collect();
        searches.sort_by(|a, b| {
            (a.destiny_version, a.search.search_type, &a.search.query).cmp(&(
                b.destiny_version,
                b.search.search_type,
                &b.search.query,
            ))
        });

        UserSnapshot { settings, loadouts, tags, item_hash_tags, triumphs, searches }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::TagValue;

    fn hash_tag(profile: u64, hash: i64) -> ExportedHashTag {
        ExportedHashTag {
            platform_membership_id: ProfileId::new(profile),
            hash_tag: ItemHashTag { hash, tag: Some(TagValue::Keep), notes: None },
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = UserSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.record_count(), 0);
    }

    #[test]
    fn test_normalized_canonicalizes_hashes() {
        let a = UserSnapshot { item_hash_tags: vec![hash_tag(1, -1)], ..Default::default() };
        let b = UserSnapshot {
            item_hash_tags: vec![hash_tag(1, i64::from(u32::MAX))],
            ..Default::default()
        };
        assert_ne!(a, b);
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn test_normalized_merges_triumph_lists() {
        let snapshot = UserSnapshot {
            triumphs: vec![
                ExportedTriumphs { platform_membership_id: ProfileId::new(5), triumphs: vec![3, 1] },
                ExportedTriumphs { platform_membership_id: ProfileId::new(5), triumphs: vec![1, 2] },
                ExportedTriumphs { platform_membership_id: ProfileId::new(6), triumphs: vec![] },
            ],
            ..Default::default()
        };
        let normalized = snapshot.normalized();
        assert_eq!(normalized.triumphs.len(), 1);
        assert_eq!(normalized.triumphs[0].triumphs, vec![1, 2, 3]);
        assert_eq!(snapshot.record_count(), 4);
    }
}
