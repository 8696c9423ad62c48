//! The closed set of entity kinds stored in the document store.
//!
//! [`StoredItem`] is the only place that knows how each kind is addressed and
//! encoded. Bulk scans classify arbitrary documents with
//! [`StoredItem::decode`], which matches the key shape exhaustively; adding a
//! kind means adding a variant, and the compiler points at every match that
//! has to handle it.

use chrono::{DateTime, Utc};
use dim_sync_store::{
    Document, KeyId, KeyPath, Namespace, PutRequest, QUERY_DIGEST_LEN, annotation_key, app_key,
    global_settings_key, hash_tag_key, loadout_key, profile_link_key, query_digest, search_key,
    settings_key, triumph_key,
};
use dim_sync_types::{
    AccountId, App, DestinyVersion, GlobalSettings, ItemAnnotation, ItemHashTag, ItemId, Loadout,
    ProfileId, Search, SearchType, Settings, canonicalize_query, decode, encode, normalize_hash,
};
use snafu::ResultExt;

use crate::{
    error::{CodecSnafu, KeySnafu, ProfileError, Result},
    records::{
        AnnotationRecord, AppRecord, GlobalSettingsRecord, HashTagRecord, LoadoutRecord,
        SearchRecord, SettingsRecord, invalid,
    },
};

/// A decoded document of a known kind, with its scope.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredItem {
    /// Account settings.
    Settings {
        /// Owner.
        account: AccountId,
        /// The settings.
        settings: Settings,
    },
    /// A recent or saved search.
    Search {
        /// Owner.
        account: AccountId,
        /// Game version.
        version: DestinyVersion,
        /// The search, with its query canonicalized.
        search: Search,
    },
    /// Marker that an account has data under a profile.
    ProfileLink {
        /// Owner.
        account: AccountId,
        /// The linked profile.
        profile: ProfileId,
    },
    /// A loadout.
    Loadout {
        /// Owning profile.
        profile: ProfileId,
        /// Game version.
        version: DestinyVersion,
        /// The loadout.
        loadout: Loadout,
    },
    /// An item instance annotation.
    Annotation {
        /// Owning profile.
        profile: ProfileId,
        /// Game version.
        version: DestinyVersion,
        /// Parsed item instance id.
        item: ItemId,
        /// The annotation.
        annotation: ItemAnnotation,
    },
    /// An item definition tag (Destiny 2 only).
    HashTag {
        /// Owning profile.
        profile: ProfileId,
        /// Canonical item hash.
        item_hash: u32,
        /// The tag.
        hash_tag: ItemHashTag,
    },
    /// A tracked triumph (Destiny 2 only).
    Triumph {
        /// Owning profile.
        profile: ProfileId,
        /// Canonical record hash.
        record_hash: u32,
    },
    /// An app registration.
    App(App),
    /// Service-wide settings for one deployment stage.
    GlobalSettings {
        /// Stage name.
        stage: String,
        /// The settings.
        settings: GlobalSettings,
    },
}

/// Parses an item instance id, accepting only the spelling it renders back to.
///
/// # Errors
///
/// Returns [`ProfileError::InvalidRecord`] for anything but canonical decimal,
/// so `"012"` cannot alias item 12.
pub(crate) fn parse_item_id(id: &str) -> Result<ItemId> {
    let item = id.parse::<ItemId>().map_err(|e| invalid("tag", e))?;
    if item.value().to_string() != id {
        return Err(invalid("tag", format_args!("item id {id:?} is not in canonical decimal form")));
    }
    Ok(item)
}

impl StoredItem {
    /// An annotation, with its item id parsed.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if the id is not a canonical
    /// decimal item id.
    pub fn annotation(
        profile: ProfileId,
        version: DestinyVersion,
        annotation: ItemAnnotation,
    ) -> Result<Self> {
        let item = parse_item_id(&annotation.id)?;
        Ok(StoredItem::Annotation { profile, version, item, annotation })
    }

    /// A hash tag, with its hash normalized.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if the hash is out of range.
    pub fn hash_tag(profile: ProfileId, mut hash_tag: ItemHashTag) -> Result<Self> {
        let item_hash = normalize_hash(hash_tag.hash).map_err(|e| invalid("item hash tag", e))?;
        hash_tag.hash = i64::from(item_hash);
        Ok(StoredItem::HashTag { profile, item_hash, hash_tag })
    }

    /// A tracked triumph, with its hash normalized.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if the hash is out of range.
    pub fn triumph(profile: ProfileId, record_hash: i64) -> Result<Self> {
        let record_hash = normalize_hash(record_hash).map_err(|e| invalid("triumph", e))?;
        Ok(StoredItem::Triumph { profile, record_hash })
    }

    /// A search, with its query canonicalized.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if the query is blank.
    pub fn search(account: AccountId, version: DestinyVersion, mut search: Search) -> Result<Self> {
        search.query = canonicalize_query(&search.query);
        if search.query.is_empty() {
            return Err(invalid("search", "query is empty"));
        }
        Ok(StoredItem::Search { account, version, search })
    }

    /// Short kind name used in logs and errors.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            StoredItem::Settings { .. } => "settings",
            StoredItem::Search { .. } => "search",
            StoredItem::ProfileLink { .. } => "profile link",
            StoredItem::Loadout { .. } => "loadout",
            StoredItem::Annotation { .. } => "tag",
            StoredItem::HashTag { .. } => "item hash tag",
            StoredItem::Triumph { .. } => "triumph",
            StoredItem::App(_) => "app",
            StoredItem::GlobalSettings { .. } => "global settings",
        }
    }

    /// Whether this is user data rather than bookkeeping.
    pub const fn is_record(&self) -> bool {
        !matches!(self, StoredItem::ProfileLink { .. })
    }

    /// Address of the document.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::Key`] if an app id or stage is not a valid name.
    pub fn key(&self) -> Result<KeyPath> {
        Ok(match self {
            StoredItem::Settings { account, .. } => settings_key(*account),
            StoredItem::Search { account, version, search } => {
                search_key(*account, *version, search_digest(search.search_type, &search.query))
            },
            StoredItem::ProfileLink { account, profile } => profile_link_key(*account, *profile),
            StoredItem::Loadout { profile, version, loadout } => {
                loadout_key(*profile, *version, loadout.id)
            },
            StoredItem::Annotation { profile, version, item, .. } => {
                annotation_key(*profile, *version, *item)
            },
            StoredItem::HashTag { profile, item_hash, .. } => hash_tag_key(*profile, *item_hash),
            StoredItem::Triumph { profile, record_hash } => triumph_key(*profile, *record_hash),
            StoredItem::App(app) => app_key(&app.id).context(KeySnafu)?,
            StoredItem::GlobalSettings { stage, .. } => {
                global_settings_key(stage).context(KeySnafu)?
            },
        })
    }

    /// Encoded record value.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::InvalidRecord`] if the record cannot be converted,
    /// or [`ProfileError::Codec`] if it cannot be encoded.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let key = || self.key().map(|k| k.to_string()).unwrap_or_default();
        let bytes = match self {
            StoredItem::Settings { settings, .. } => encode(&SettingsRecord::from(settings)),
            StoredItem::Search { search, .. } => encode(&SearchRecord::from(search)),
            StoredItem::ProfileLink { .. } | StoredItem::Triumph { .. } => Ok(Vec::new()),
            StoredItem::Loadout { loadout, .. } => encode(&LoadoutRecord::from_domain(loadout)?),
            StoredItem::Annotation { annotation, .. } => {
                encode(&AnnotationRecord::from(annotation))
            },
            StoredItem::HashTag { hash_tag, .. } => encode(&HashTagRecord {
                tag: hash_tag.tag,
                notes: hash_tag.notes.clone(),
            }),
            StoredItem::App(app) => encode(&AppRecord {
                bungie_api_key: app.bungie_api_key.clone(),
                dim_api_key: app.dim_api_key,
                origin: app.origin.clone(),
            }),
            StoredItem::GlobalSettings { settings, .. } => {
                encode(&GlobalSettingsRecord::from(settings))
            },
        };
        bytes.with_context(|_| CodecSnafu { key: key() })
    }

    /// Creation time to preserve when the record is imported.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            StoredItem::Loadout { loadout, .. } => loadout.created_at,
            StoredItem::App(app) => app.created_at,
            _ => None,
        }
    }

    /// A put request for this record, preserving its creation time.
    ///
    /// # Errors
    ///
    /// As [`key`](Self::key) and [`encode`](Self::encode).
    pub fn to_put(&self) -> Result<PutRequest> {
        Ok(PutRequest::new(self.key()?, self.encode()?).with_created_at(self.created_at()))
    }

    /// Classifies and decodes a document by the shape of its key.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError::UnrecognizedKey`] if the key matches no kind,
    /// or [`ProfileError::Codec`] if the value cannot be decoded.
    pub fn decode(doc: &Document) -> Result<Self> {
        let levels: Vec<(Namespace, &KeyId)> =
            doc.key.levels().iter().map(|level| (level.namespace(), level.id())).collect();
        let unrecognized = || ProfileError::UnrecognizedKey { key: doc.key.to_string() };
        let codec = || CodecSnafu { key: doc.key.to_string() };

        let item = match levels.as_slice() {
            [(Namespace::Account, KeyId::Int(account)), (Namespace::Settings, KeyId::Unit)] => {
                let record: SettingsRecord = decode(&doc.value).context(codec())?;
                StoredItem::Settings { account: AccountId::new(*account), settings: record.into() }
            },
            [
                (Namespace::Account, KeyId::Int(account)),
                (Namespace::Destiny, KeyId::Int(version)),
                (Namespace::Search, KeyId::Digest(_)),
            ] => {
                let record: SearchRecord = decode(&doc.value).context(codec())?;
                StoredItem::Search {
                    account: AccountId::new(*account),
                    version: destiny_version(*version).ok_or_else(unrecognized)?,
                    search: record.into(),
                }
            },
            [(Namespace::Account, KeyId::Int(account)), (Namespace::Profile, KeyId::Int(profile))] => {
                StoredItem::ProfileLink {
                    account: AccountId::new(*account),
                    profile: ProfileId::new(*profile),
                }
            },
            [
                (Namespace::Profile, KeyId::Int(profile)),
                (Namespace::Destiny, KeyId::Int(version)),
                (Namespace::Loadout, KeyId::Uuid(id)),
            ] => {
                let record: LoadoutRecord = decode(&doc.value).context(codec())?;
                StoredItem::Loadout {
                    profile: ProfileId::new(*profile),
                    version: destiny_version(*version).ok_or_else(unrecognized)?,
                    loadout: record.into_domain(*id, doc.created_at, doc.updated_at)?,
                }
            },
            [
                (Namespace::Profile, KeyId::Int(profile)),
                (Namespace::Destiny, KeyId::Int(version)),
                (Namespace::ItemAnnotation, KeyId::Int(item)),
            ] => {
                let record: AnnotationRecord = decode(&doc.value).context(codec())?;
                StoredItem::Annotation {
                    profile: ProfileId::new(*profile),
                    version: destiny_version(*version).ok_or_else(unrecognized)?,
                    item: ItemId::new(*item),
                    annotation: ItemAnnotation {
                        id: item.to_string(),
                        tag: record.tag,
                        notes: record.notes,
                        crafted_date: record.crafted_date,
                    },
                }
            },
            [
                (Namespace::Profile, KeyId::Int(profile)),
                (Namespace::Destiny, KeyId::Int(2)),
                (Namespace::ItemHashTag, KeyId::Int(hash)),
            ] => {
                let record: HashTagRecord = decode(&doc.value).context(codec())?;
                let item_hash = u32::try_from(*hash).map_err(|_| unrecognized())?;
                StoredItem::HashTag {
                    profile: ProfileId::new(*profile),
                    item_hash,
                    hash_tag: ItemHashTag {
                        hash: i64::from(item_hash),
                        tag: record.tag,
                        notes: record.notes,
                    },
                }
            },
            [
                (Namespace::Profile, KeyId::Int(profile)),
                (Namespace::Destiny, KeyId::Int(2)),
                (Namespace::Triumph, KeyId::Int(hash)),
            ] => StoredItem::Triumph {
                profile: ProfileId::new(*profile),
                record_hash: u32::try_from(*hash).map_err(|_| unrecognized())?,
            },
            [(Namespace::App, KeyId::Name(id))] => {
                let record: AppRecord = decode(&doc.value).context(codec())?;
                StoredItem::App(App {
                    id: id.clone(),
                    bungie_api_key: record.bungie_api_key,
                    dim_api_key: record.dim_api_key,
                    origin: record.origin,
                    created_at: Some(doc.created_at),
                })
            },
            [(Namespace::GlobalSettings, KeyId::Name(stage))] => {
                let record: GlobalSettingsRecord = decode(&doc.value).context(codec())?;
                StoredItem::GlobalSettings {
                    stage: stage.clone(),
                    settings: GlobalSettings {
                        dim_api_enabled: record.dim_api_enabled,
                        dim_profile_min_refresh_interval: record.dim_profile_min_refresh_interval,
                        show_issue_banner: record.show_issue_banner,
                        last_updated: Some(doc.updated_at),
                    },
                }
            },
            _ => return Err(unrecognized()),
        };
        Ok(item)
    }
}

/// Digest keying a search: the query digest of `"{type}/{canonical query}"`,
/// so the same text searched as items and as loadouts stays two records.
pub fn search_digest(search_type: SearchType, canonical_query: &str) -> [u8; QUERY_DIGEST_LEN] {
    let type_tag = match search_type {
        SearchType::Item => "item",
        SearchType::Loadout => "loadout",
    };
    query_digest(&format!("{type_tag}/{canonical_query}"))
}

fn destiny_version(raw: u64) -> Option<DestinyVersion> {
    u8::try_from(raw).ok().and_then(DestinyVersion::from_u8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;
    use dim_sync_store::settings_key;
    use uuid::Uuid;

    use super::*;

    fn as_document(item: &StoredItem) -> Document {
        let now = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        Document {
            key: item.key().expect("key"),
            value: item.encode().expect("encode"),
            version: 1,
            created_at: item.created_at().unwrap_or(now),
            updated_at: now,
        }
    }

    fn round_trip(item: &StoredItem) -> StoredItem {
        StoredItem::decode(&as_document(item)).expect("decode")
    }

    #[test]
    fn test_every_kind_classifies_to_itself() {
        let account = AccountId::new(11);
        let profile = ProfileId::new(4611686018);
        let items = vec![
            StoredItem::Settings { account, settings: Settings::default() },
            StoredItem::search(
                account,
                DestinyVersion::D1,
                Search {
                    query: "is:weapon".into(),
                    usage_count: 3,
                    saved: true,
                    last_usage: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
                    search_type: SearchType::Loadout,
                },
            )
            .expect("search"),
            StoredItem::ProfileLink { account, profile },
            StoredItem::annotation(
                profile,
                DestinyVersion::D2,
                ItemAnnotation {
                    id: "6917529123".into(),
                    tag: Some(dim_sync_types::TagValue::Junk),
                    notes: None,
                    crafted_date: Some(5),
                },
            )
            .expect("annotation"),
            StoredItem::hash_tag(profile, ItemHashTag { hash: -2, tag: None, notes: Some("n".into()) })
                .expect("hash tag"),
            StoredItem::triumph(profile, 1234).expect("triumph"),
        ];
        for item in &items {
            assert_eq!(&round_trip(item), item, "{}", item.kind_name());
        }
    }

    #[test]
    fn test_loadout_takes_timestamps_from_document() {
        let loadout: Loadout = serde_json::from_value(serde_json::json!({
            "id": Uuid::nil(), "name": "x", "createdAt": 1_600_000_000_000i64
        }))
        .expect("loadout");
        let item =
            StoredItem::Loadout { profile: ProfileId::new(1), version: DestinyVersion::D2, loadout };
        let StoredItem::Loadout { loadout, .. } = round_trip(&item) else { panic!("not a loadout") };
        assert_eq!(loadout.created_at.expect("created").timestamp_millis(), 1_600_000_000_000);
        assert!(loadout.last_updated_at.is_some());
    }

    #[test]
    fn test_hash_normalized_at_construction() {
        let StoredItem::HashTag { item_hash, hash_tag, .. } =
            StoredItem::hash_tag(ProfileId::new(1), ItemHashTag { hash: -1, tag: None, notes: None })
                .expect("hash tag")
        else {
            panic!("not a hash tag")
        };
        assert_eq!(item_hash, u32::MAX);
        assert_eq!(hash_tag.hash, i64::from(u32::MAX));
        assert!(StoredItem::triumph(ProfileId::new(1), i64::MAX).is_err());
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let bad_id = ItemAnnotation { id: "abc".into(), tag: None, notes: None, crafted_date: None };
        assert!(StoredItem::annotation(ProfileId::new(1), DestinyVersion::D2, bad_id).is_err());
        for id in ["012", "+12", " 12", ""] {
            let annotation =
                ItemAnnotation { id: id.into(), tag: Some(dim_sync_types::TagValue::Keep), notes: None, crafted_date: None };
            let err = StoredItem::annotation(ProfileId::new(1), DestinyVersion::D2, annotation).unwrap_err();
            assert!(matches!(err, ProfileError::InvalidRecord { kind: "tag", .. }), "{id:?}");
        }
        let blank = Search {
            query: "   ".into(),
            usage_count: 1,
            saved: false,
            last_usage: Utc::now(),
            search_type: SearchType::Item,
        };
        assert!(StoredItem::search(AccountId::new(1), DestinyVersion::D2, blank).is_err());
    }

    #[test]
    fn test_unknown_key_shape_is_rejected() {
        let mut doc = as_document(&StoredItem::Settings {
            account: AccountId::new(1),
            settings: Settings::default(),
        });
        doc.key = dim_sync_store::KeyPath::build(vec![dim_sync_store::KeyLevel::account(AccountId::new(1))])
            .expect("key");
        assert!(matches!(StoredItem::decode(&doc), Err(ProfileError::UnrecognizedKey { .. })));
        assert_eq!(settings_key(AccountId::new(1)).to_string(), "/acct-1/settings");
    }

    #[test]
    fn test_search_digest_separates_types() {
        assert_ne!(search_digest(SearchType::Item, "q"), search_digest(SearchType::Loadout, "q"));
    }
}
