//! Hand-written sample data.
//!
//! The sample account deliberately includes the awkward cases: a hash stored
//! sign-extended, two spellings of one query, an empty annotation and
//! unrecognized fields on a loadout.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use dim_sync_types::{
    AccountId, DestinyVersion, ExportedAnnotation, ExportedHashTag, ExportedLoadout,
    ExportedSearch, ExportedTriumphs, ItemAnnotation, ItemHashTag, Loadout, ProfileId, Search,
    SearchType, Settings, TagValue, UserSnapshot,
};
use uuid::Uuid;

/// Account used by the migration scenarios.
pub const SAMPLE_ACCOUNT: AccountId = AccountId::new(4321);

/// Destiny 2 profile of [`SAMPLE_ACCOUNT`].
pub const SAMPLE_PROFILE: ProfileId = ProfileId::new(4611686018467284386);

/// A loadout parsed from client JSON, unrecognized fields included.
pub fn sample_loadout() -> Loadout {
    let json = serde_json::json!({
        "id": "6a1c7f3e-58a2-4c1b-9c9e-2f6d0b1e4a77",
        "name": "Raid Day",
        "classType": 2,
        "clearSpace": true,
        "equipped": [
            {"id": "6917529581236574312", "hash": -1153742474, "socketOverrides": {"2": 3317284924u32}},
            {"id": "6917529581236574313", "hash": 1363886209, "legacyPerkCache": [1, 2]}
        ],
        "unequipped": [{"hash": 2979281381u32, "amount": 5}],
        "parameters": {"exoticArmorHash": 3045642045u32},
        "createdAt": 1_650_000_000_000i64,
        "clientRevision": 7
    });
    serde_json::from_value(json).unwrap_or_else(|_| Loadout {
        id: Uuid::nil(),
        name: "Raid Day".into(),
        notes: None,
        class_type: Default::default(),
        clear_space: false,
        equipped: Vec::new(),
        unequipped: Vec::new(),
        parameters: None,
        created_at: None,
        last_updated_at: None,
        extra: BTreeMap::new(),
    })
}

/// A small but complete account.
pub fn sample_snapshot() -> UserSnapshot {
    let search = |query: &str, usage_count, saved, millis| ExportedSearch {
        destiny_version: DestinyVersion::D2,
        search: Search {
            query: query.into(),
            usage_count,
            saved,
            last_usage: Utc.timestamp_millis_opt(millis).single().unwrap_or_default(),
            search_type: SearchType::Item,
        },
    };
    let annotation = |id: &str, tag, notes: Option<&str>| ExportedAnnotation {
        platform_membership_id: SAMPLE_PROFILE,
        destiny_version: DestinyVersion::D2,
        annotation: ItemAnnotation {
            id: id.into(),
            tag,
            notes: notes.map(str::to_string),
            crafted_date: None,
        },
    };

    UserSnapshot {
        settings: Some(Settings { item_size: 62, ..Settings::default() }),
        loadouts: vec![ExportedLoadout {
            platform_membership_id: SAMPLE_PROFILE,
            destiny_version: DestinyVersion::D2,
            loadout: sample_loadout(),
        }],
        tags: vec![
            annotation("6917529581236574312", Some(TagValue::Favorite), Some("god roll")),
            annotation("6917529581236574313", Some(TagValue::Junk), None),
            // Carries nothing; never stored.
            annotation("6917529581236574314", None, Some("")),
        ],
        item_hash_tags: vec![ExportedHashTag {
            platform_membership_id: SAMPLE_PROFILE,
            hash_tag: ItemHashTag { hash: -1153742474, tag: Some(TagValue::Keep), notes: None },
        }],
        triumphs: vec![ExportedTriumphs {
            platform_membership_id: SAMPLE_PROFILE,
            triumphs: vec![1_959_753_477, -2_000_000_000],
        }],
        searches: vec![
            search("is:weapon perk:outlaw", 4, false, 1_700_000_000_000),
            search("is:weapon  perk:outlaw ", 2, true, 1_700_000_500_000),
            search("tag:junk", 9, true, 1_690_000_000_000),
        ],
    }
}
