//! Proptest strategies for DIM sync domain types.
//!
//! Generated snapshots never contain two records with the same identity, so
//! a snapshot survives a round trip through either store unchanged (modulo
//! [`UserSnapshot::normalized`]). Hashes above `i32::MAX` are randomly
//! spelled sign-extended to exercise normalization.
//!
//! # Usage
//!
//! ```no_run
//! use dim_sync_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(snapshot in strategies::arb_snapshot()) {
//!         // test invariant with a randomly generated account
//!     }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use dim_sync_types::{
    DestinyClass, DestinyVersion, ExportedAnnotation, ExportedHashTag, ExportedLoadout,
    ExportedSearch, ExportedTriumphs, ItemAnnotation, ItemHashTag, Loadout, LoadoutItem,
    ProfileId, Search, SearchType, Settings, TagValue, UserSnapshot,
};
use proptest::prelude::*;
use uuid::Uuid;

/// Profiles generated snapshots spread their records over.
pub const PROFILES: [u64; 2] = [4611686018467284386, 4611686018429784201];

/// A canonical hash, spelled either unsigned or sign-extended.
pub fn arb_hash() -> impl Strategy<Value = i64> {
    (any::<u32>(), any::<bool>()).prop_map(|(hash, signed)| spell_hash(hash, signed))
}

/// Renders a hash, sign-extended when `signed` and the hash exceeds `i32::MAX`.
pub fn spell_hash(hash: u32, signed: bool) -> i64 {
    if signed { i64::from(hash as i32) } else { i64::from(hash) }
}

/// One of [`PROFILES`].
pub fn arb_profile() -> impl Strategy<Value = ProfileId> {
    prop::sample::select(PROFILES.to_vec()).prop_map(ProfileId::new)
}

/// Either game version.
pub fn arb_version() -> impl Strategy<Value = DestinyVersion> {
    prop_oneof![Just(DestinyVersion::D1), Just(DestinyVersion::D2)]
}

/// Any tag.
pub fn arb_tag() -> impl Strategy<Value = TagValue> {
    prop_oneof![
        Just(TagValue::Favorite),
        Just(TagValue::Keep),
        Just(TagValue::Infuse),
        Just(TagValue::Junk),
        Just(TagValue::Archive),
    ]
}

/// A millisecond-precision timestamp between 2017 and 2033.
pub fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    (1_500_000_000_000i64..2_000_000_000_000)
        .prop_map(|millis| Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
}

/// Settings with random values and no unrecognized fields.
pub fn arb_settings() -> impl Strategy<Value = Settings> {
    (
        20u32..80,
        any::<bool>(),
        prop::sample::select(vec!["en", "de", "fr", "ja"]),
        prop::collection::btree_map(0u8..4, prop::collection::vec(any::<u32>(), 0..4), 0..3),
    )
        .prop_map(|(item_size, show_new_items, language, stats)| Settings {
            item_size,
            show_new_items,
            language: language.to_string(),
            custom_total_stats_by_class: stats
                .into_iter()
                .map(|(class, hashes)| (class.to_string(), hashes))
                .collect(),
            ..Settings::default()
        })
}

/// A loadout item.
pub fn arb_loadout_item() -> impl Strategy<Value = LoadoutItem> {
    (
        proptest::option::of(any::<u64>()),
        arb_hash(),
        proptest::option::of(1u32..100),
        proptest::option::of(prop::collection::btree_map(0u32..12, any::<u32>(), 1..3)),
    )
        .prop_map(|(id, hash, amount, sockets)| LoadoutItem {
            id: id.map(|id| id.to_string()),
            hash,
            amount,
            socket_overrides: sockets
                .map(|s| s.into_iter().map(|(index, plug)| (index.to_string(), plug)).collect()),
            crafted_date: None,
            extra: BTreeMap::new(),
        })
}

/// A loadout with the given id.
pub fn arb_loadout(id: Uuid) -> impl Strategy<Value = Loadout> {
    (
        "[A-Za-z][A-Za-z ]{0,15}",
        proptest::option::of("[a-z ]{1,20}"),
        prop_oneof![
            Just(DestinyClass::Titan),
            Just(DestinyClass::Hunter),
            Just(DestinyClass::Warlock),
            Just(DestinyClass::Unknown),
        ],
        any::<bool>(),
        prop::collection::vec(arb_loadout_item(), 0..4),
        prop::collection::vec(arb_loadout_item(), 0..3),
        proptest::option::of("[a-z:]{1,10}"),
    )
        .prop_map(move |(name, notes, class_type, clear_space, equipped, unequipped, query)| {
            Loadout {
                id,
                name,
                notes,
                class_type,
                clear_space,
                equipped,
                unequipped,
                parameters: query.map(|q| serde_json::json!({ "query": q })),
                created_at: None,
                last_updated_at: None,
                extra: BTreeMap::new(),
            }
        })
}

/// A non-empty annotation of `item`.
pub fn arb_annotation(item: u64) -> impl Strategy<Value = ItemAnnotation> {
    (arb_tag(), proptest::option::of("[a-z ]{1,20}"), proptest::option::of(any::<u32>()))
        .prop_map(move |(tag, notes, crafted)| ItemAnnotation {
            id: item.to_string(),
            tag: Some(tag),
            notes,
            crafted_date: crafted.map(i64::from),
        })
}

/// A search with a canonical query.
pub fn arb_search(query: String, search_type: SearchType) -> impl Strategy<Value = Search> {
    (1u32..50, any::<bool>(), arb_timestamp()).prop_map(move |(usage_count, saved, last_usage)| {
        Search { query: query.clone(), usage_count, saved, last_usage, search_type }
    })
}

/// A whole account whose records all have distinct identities.
pub fn arb_snapshot() -> impl Strategy<Value = UserSnapshot> {
    let loadouts = prop::collection::btree_set(
        (arb_profile(), arb_version(), any::<u128>()),
        0..4,
    )
    .prop_flat_map(|ids| {
        ids.into_iter()
            .map(|(profile, version, id)| {
                arb_loadout(Uuid::from_u128(id)).prop_map(move |loadout| ExportedLoadout {
                    platform_membership_id: profile,
                    destiny_version: version,
                    loadout,
                })
            })
            .collect::<Vec<_>>()
    });

    let tags = prop::collection::btree_set((arb_profile(), arb_version(), any::<u64>()), 0..6)
        .prop_flat_map(|ids| {
            ids.into_iter()
                .map(|(profile, version, item)| {
                    arb_annotation(item).prop_map(move |annotation| ExportedAnnotation {
                        platform_membership_id: profile,
                        destiny_version: version,
                        annotation,
                    })
                })
                .collect::<Vec<_>>()
        });

    let hash_tags = prop::collection::btree_map(
        (arb_profile(), any::<u32>()),
        (any::<bool>(), arb_tag()),
        0..5,
    )
    .prop_map(|tags| {
        tags.into_iter()
            .map(|((profile, hash), (signed, tag))| ExportedHashTag {
                platform_membership_id: profile,
                hash_tag: ItemHashTag { hash: spell_hash(hash, signed), tag: Some(tag), notes: None },
            })
            .collect::<Vec<_>>()
    });

    let triumphs = prop::collection::btree_map(
        arb_profile(),
        prop::collection::btree_set(any::<u32>(), 1..5),
        0..2,
    )
    .prop_map(|by_profile| {
        by_profile
            .into_iter()
            .map(|(profile, hashes)| ExportedTriumphs {
                platform_membership_id: profile,
                triumphs: hashes.into_iter().map(i64::from).collect(),
            })
            .collect::<Vec<_>>()
    });

    let searches = prop::collection::btree_set(
        (
            arb_version(),
            prop_oneof![Just(SearchType::Item), Just(SearchType::Loadout)],
            "[a-z]{1,6}(:[a-z]{1,6})?",
        ),
        0..5,
    )
    .prop_flat_map(|keys| {
        keys.into_iter()
            .map(|(version, search_type, query)| {
                arb_search(query, search_type)
                    .prop_map(move |search| ExportedSearch { destiny_version: version, search })
            })
            .collect::<Vec<_>>()
    });

    (proptest::option::of(arb_settings()), loadouts, tags, hash_tags, triumphs, searches).prop_map(
        |(settings, loadouts, tags, item_hash_tags, triumphs, searches)| UserSnapshot {
            settings,
            loadouts,
            tags,
            item_hash_tags,
            triumphs,
            searches,
        },
    )
}
