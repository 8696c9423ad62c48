//! Document-store record formats and their conversion from domain records.
//!
//! Records are postcard-encoded. They hold only what the document store needs:
//! ids that appear in the key are not repeated, hashes are canonical `u32`,
//! timestamps are epoch milliseconds, and unrecognized domain fields are
//! dropped. Conversion into a record is where hash normalization happens;
//! nothing is patched on the way back out.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dim_sync_types::{
    CharacterOrder, DestinyClass, GlobalSettings, ItemAnnotation, ItemHashTag, Loadout,
    LoadoutItem, Search, SearchType, Settings, TagValue, normalize_hash,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProfileError, Result};

/// Stored form of [`Settings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsRecord {
    pub item_size: u32,
    pub character_order: CharacterOrder,
    pub custom_character_sort: Vec<String>,
    pub show_new_items: bool,
    pub language: String,
    pub compare_base_stats: bool,
    pub custom_total_stats_by_class: BTreeMap<u8, Vec<u32>>,
    pub farming_make_room_for_items: bool,
}

impl From<&Settings> for SettingsRecord {
    fn from(settings: &Settings) -> Self {
        Self {
            item_size: settings.item_size,
            character_order: settings.character_order,
            custom_character_sort: settings.custom_character_sort.clone(),
            show_new_items: settings.show_new_items,
            language: settings.language.clone(),
            compare_base_stats: settings.compare_base_stats,
            custom_total_stats_by_class: numeric_keys(&settings.custom_total_stats_by_class),
            farming_make_room_for_items: settings.farming_make_room_for_items,
        }
    }
}

impl From<SettingsRecord> for Settings {
    fn from(record: SettingsRecord) -> Self {
        Settings {
            item_size: record.item_size,
            character_order: record.character_order,
            custom_character_sort: record.custom_character_sort,
            show_new_items: record.show_new_items,
            language: record.language,
            compare_base_stats: record.compare_base_stats,
            custom_total_stats_by_class: decimal_keys(record.custom_total_stats_by_class),
            farming_make_room_for_items: record.farming_make_room_for_items,
            extra: BTreeMap::new(),
        }
    }
}

/// Stored form of a [`LoadoutItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadoutItemRecord {
    pub id: Option<String>,
    pub hash: u32,
    pub amount: Option<u32>,
    pub socket_overrides: Option<BTreeMap<u32, u32>>,
    pub crafted_date: Option<i64>,
}

/// Stored form of a [`Loadout`]. The id lives in the key; timestamps come
/// from the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadoutRecord {
    pub name: String,
    pub notes: Option<String>,
    pub class_type: u8,
    pub clear_space: bool,
    pub equipped: Vec<LoadoutItemRecord>,
    pub unequipped: Vec<LoadoutItemRecord>,
    /// Free-form parameters as JSON text.
    pub parameters: Option<String>,
}

impl LoadoutRecord {
    /// Converts a domain loadout, normalizing item hashes.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if an item hash is out of range.
    pub fn from_domain(loadout: &Loadout) -> Result<Self> {
        let items = |items: &[LoadoutItem]| -> Result<Vec<LoadoutItemRecord>> {
            items
                .iter()
                .map(|item| {
                    Ok(LoadoutItemRecord {
                        id: item.id.clone(),
                        hash: normalize_hash(item.hash).map_err(|e| invalid("loadout", e))?,
                        amount: item.amount,
                        socket_overrides: item.socket_overrides.as_ref().map(numeric_keys),
                        crafted_date: item.crafted_date,
                    })
                })
                .collect()
        };
        let parameters = loadout
            .parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| invalid("loadout", e))?;
        Ok(Self {
            name: loadout.name.clone(),
            notes: loadout.notes.clone(),
            class_type: loadout.class_type.into(),
            clear_space: loadout.clear_space,
            equipped: items(&loadout.equipped)?,
            unequipped: items(&loadout.unequipped)?,
            parameters,
        })
    }

    /// Rebuilds the domain loadout.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if the class or parameters are corrupt.
    pub fn into_domain(
        self,
        id: Uuid,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Loadout> {
        let item = |item: LoadoutItemRecord| LoadoutItem {
            id: item.id,
            hash: i64::from(item.hash),
            amount: item.amount,
            socket_overrides: item.socket_overrides.map(decimal_keys),
            crafted_date: item.crafted_date,
            extra: BTreeMap::new(),
        };
        let parameters = self
            .parameters
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| invalid("loadout", e))?;
        Ok(Loadout {
            id,
            name: self.name,
            notes: self.notes,
            class_type: DestinyClass::try_from(self.class_type).map_err(|e| invalid("loadout", e))?,
            clear_space: self.clear_space,
            equipped: self.equipped.into_iter().map(item).collect(),
            unequipped: self.unequipped.into_iter().map(item).collect(),
            parameters,
            created_at: Some(created_at),
            last_updated_at: Some(updated_at),
            extra: BTreeMap::new(),
        })
    }
}

/// Stored form of an [`ItemAnnotation`]. The item id lives in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub tag: Option<TagValue>,
    pub notes: Option<String>,
    pub crafted_date: Option<i64>,
}

impl From<&ItemAnnotation> for AnnotationRecord {
    fn from(annotation: &ItemAnnotation) -> Self {
        Self {
            tag: annotation.tag,
            notes: annotation.notes.clone(),
            crafted_date: annotation.crafted_date,
        }
    }
}

/// Stored form of an [`ItemHashTag`]. The hash lives in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashTagRecord {
    pub tag: Option<TagValue>,
    pub notes: Option<String>,
}

/// Stored form of a [`Search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub query: String,
    pub usage_count: u32,
    pub saved: bool,
    pub last_usage_ms: i64,
    pub search_type: SearchType,
}

impl From<&Search> for SearchRecord {
    fn from(search: &Search) -> Self {
        Self {
            query: search.query.clone(),
            usage_count: search.usage_count,
            saved: search.saved,
            last_usage_ms: search.last_usage.timestamp_millis(),
            search_type: search.search_type,
        }
    }
}

impl From<SearchRecord> for Search {
    fn from(record: SearchRecord) -> Self {
        Search {
            query: record.query,
            usage_count: record.usage_count,
            saved: record.saved,
            last_usage: from_millis(record.last_usage_ms),
            search_type: record.search_type,
        }
    }
}

/// Stored form of an [`App`](dim_sync_types::App). The app id lives in the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub bungie_api_key: String,
    pub dim_api_key: Uuid,
    pub origin: String,
}

/// Stored form of [`GlobalSettings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettingsRecord {
    pub dim_api_enabled: bool,
    pub dim_profile_min_refresh_interval: u32,
    pub show_issue_banner: bool,
}

impl From<&GlobalSettings> for GlobalSettingsRecord {
    fn from(settings: &GlobalSettings) -> Self {
        Self {
            dim_api_enabled: settings.dim_api_enabled,
            dim_profile_min_refresh_interval: settings.dim_profile_min_refresh_interval,
            show_issue_banner: settings.show_issue_banner,
        }
    }
}

/// Parses decimal map keys, dropping keys that are not numbers.
fn numeric_keys<K: std::str::FromStr + Ord, V: Clone>(map: &BTreeMap<String, V>) -> BTreeMap<K, V> {
    map.iter().filter_map(|(k, v)| Some((k.parse().ok()?, v.clone()))).collect()
}

fn decimal_keys<K: ToString, V>(map: BTreeMap<K, V>) -> BTreeMap<String, V> {
    map.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Converts epoch milliseconds, clamping unrepresentable values to the epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn invalid(kind: &'static str, err: impl std::fmt::Display) -> ProfileError {
    ProfileError::InvalidRecord { kind, message: err.to_string() }
}
