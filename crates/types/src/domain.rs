//! Domain records exchanged with the request layer.
//!
//! These are the shapes the HTTP layer hands to the core and expects back.
//! They are deliberately lenient: unknown JSON fields are captured in `extra`
//! maps so that conversion into a store's typed records can drop them instead
//! of failing. Hash fields are `i64` because rows written by older schemas may
//! hold sign-extended values; see [`normalize_hash`](crate::normalize_hash).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unrecognized JSON fields carried alongside a record.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Enumerations
// ============================================================================

/// User-assigned item tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagValue {
    /// Favorite item.
    Favorite,
    /// Keep this item.
    Keep,
    /// Use as infusion fuel.
    Infuse,
    /// Dismantle candidate.
    Junk,
    /// Archived, hidden from most views.
    Archive,
}

/// Character class a loadout is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum DestinyClass {
    /// Titan.
    Titan = 0,
    /// Hunter.
    Hunter = 1,
    /// Warlock.
    Warlock = 2,
    /// Any class.
    #[default]
    Unknown = 3,
}

impl TryFrom<u8> for DestinyClass {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Titan),
            1 => Ok(Self::Hunter),
            2 => Ok(Self::Warlock),
            3 => Ok(Self::Unknown),
            other => Err(format!("unknown class type {other}")),
        }
    }
}

impl From<DestinyClass> for u8 {
    fn from(class: DestinyClass) -> Self {
        class as u8
    }
}

/// What a saved or recent search filters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Inventory item search.
    #[default]
    Item,
    /// Loadout search.
    Loadout,
}

/// How characters are ordered in the inventory view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum CharacterOrder {
    /// Most recently played first.
    #[default]
    MostRecent,
    /// Most recently played last.
    MostRecentReverse,
    /// Fixed creation order.
    Fixed,
    /// User-defined order.
    Custom,
}

// ============================================================================
// Account-scoped records
// ============================================================================

/// Per-account application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Inventory tile size in pixels.
    pub item_size: u32,
    /// Character ordering mode.
    pub character_order: CharacterOrder,
    /// Character ids in custom order, used with [`CharacterOrder::Custom`].
    pub custom_character_sort: Vec<String>,
    /// Highlight newly acquired items.
    pub show_new_items: bool,
    /// UI language code.
    pub language: String,
    /// Compare base stats instead of total stats.
    pub compare_base_stats: bool,
    /// Stat hashes contributing to the custom total, keyed by decimal class type.
    pub custom_total_stats_by_class: BTreeMap<String, Vec<u32>>,
    /// Whether farming mode keeps inventory slots free.
    pub farming_make_room_for_items: bool,
    /// Unrecognized settings; dropped on conversion.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            item_size: 50,
            character_order: CharacterOrder::MostRecent,
            custom_character_sort: Vec::new(),
            show_new_items: false,
            language: "en".to_string(),
            compare_base_stats: false,
            custom_total_stats_by_class: BTreeMap::new(),
            farming_make_room_for_items: true,
            extra: ExtraFields::new(),
        }
    }
}

/// A partial settings update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    /// See [`Settings::item_size`].
    pub item_size: Option<u32>,
    /// See [`Settings::character_order`].
    pub character_order: Option<CharacterOrder>,
    /// See [`Settings::custom_character_sort`].
    pub custom_character_sort: Option<Vec<String>>,
    /// See [`Settings::show_new_items`].
    pub show_new_items: Option<bool>,
    /// See [`Settings::language`].
    pub language: Option<String>,
    /// See [`Settings::compare_base_stats`].
    pub compare_base_stats: Option<bool>,
    /// See [`Settings::custom_total_stats_by_class`].
    pub custom_total_stats_by_class: Option<BTreeMap<String, Vec<u32>>>,
    /// See [`Settings::farming_make_room_for_items`].
    pub farming_make_room_for_items: Option<bool>,
}

impl SettingsPatch {
    /// Applies the patch on top of existing settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(v) = self.item_size {
            settings.item_size = v;
        }
        if let Some(v) = self.character_order {
            settings.character_order = v;
        }
        if let Some(v) = &self.custom_character_sort {
            settings.custom_character_sort = v.clone();
        }
        if let Some(v) = self.show_new_items {
            settings.show_new_items = v;
        }
        if let Some(v) = &self.language {
            settings.language = v.clone();
        }
        if let Some(v) = self.compare_base_stats {
            settings.compare_base_stats = v;
        }
        if let Some(v) = &self.custom_total_stats_by_class {
            settings.custom_total_stats_by_class = v.clone();
        }
        if let Some(v) = self.farming_make_room_for_items {
            settings.farming_make_room_for_items = v;
        }
    }
}

/// A recent or saved search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Search {
    /// The query text as typed.
    pub query: String,
    /// How many times the query has been run.
    pub usage_count: u32,
    /// Whether the user pinned the query.
    #[serde(default)]
    pub saved: bool,
    /// When the query was last run.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_usage: DateTime<Utc>,
    /// What the query filters.
    #[serde(rename = "type", default)]
    pub search_type: SearchType,
}

// ============================================================================
// Profile-scoped records
// ============================================================================

/// One item slot in a loadout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadoutItem {
    /// Item instance id, absent for uninstanced items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item definition hash, possibly sign-extended.
    pub hash: i64,
    /// Stack size for stackable items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u32>,
    /// Plug hash overrides keyed by decimal socket index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_overrides: Option<BTreeMap<String, u32>>,
    /// Crafting timestamp used to re-identify crafted weapons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crafted_date: Option<i64>,
    /// Unrecognized item fields; dropped on conversion.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// A saved set of items for one character class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loadout {
    /// Client-generated loadout id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Class restriction.
    #[serde(default)]
    pub class_type: DestinyClass,
    /// Move everything else out of the way when applying.
    #[serde(default)]
    pub clear_space: bool,
    /// Items to equip.
    #[serde(default)]
    pub equipped: Vec<LoadoutItem>,
    /// Items to carry but not equip.
    #[serde(default)]
    pub unequipped: Vec<LoadoutItem>,
    /// Loadout optimizer parameters; opaque JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    /// Creation time.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Unrecognized loadout fields; dropped on conversion.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Tag and notes attached to one item instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemAnnotation {
    /// Item instance id, as a decimal string.
    pub id: String,
    /// Assigned tag, `None` clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagValue>,
    /// Notes, `None` or empty clears them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Crafting timestamp used to re-identify crafted weapons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crafted_date: Option<i64>,
}

impl ItemAnnotation {
    /// An annotation with neither tag nor notes carries no information and is deleted.
    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.notes.as_deref().is_none_or(str::is_empty)
    }
}

/// Tag and notes attached to every instance of an item definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemHashTag {
    /// Item definition hash, possibly sign-extended.
    pub hash: i64,
    /// Assigned tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagValue>,
    /// Notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ItemHashTag {
    /// See [`ItemAnnotation::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.notes.as_deref().is_none_or(str::is_empty)
    }
}

// ============================================================================
// Global records
// ============================================================================

/// A registered API client application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    /// Short application name, e.g. `dim`.
    pub id: String,
    /// Bungie.net API key the app was registered with.
    pub bungie_api_key: String,
    /// Key the app presents to this API.
    pub dim_api_key: Uuid,
    /// Allowed CORS origin.
    pub origin: String,
    /// Registration time.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// Service-wide flags read by every client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Whether clients should use this API at all.
    pub dim_api_enabled: bool,
    /// Minimum seconds between profile refreshes.
    pub dim_profile_min_refresh_interval: u32,
    /// Whether to show the issue banner.
    pub show_issue_banner: bool,
    /// Last modification time.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            dim_api_enabled: true,
            dim_profile_min_refresh_interval: 30,
            show_issue_banner: false,
            last_updated: None,
        }
    }
}
