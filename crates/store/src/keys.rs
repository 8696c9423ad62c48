//! Hierarchical key paths for the document store.
//!
//! Every document lives at a path of `(namespace, id)` levels, rendered as
//! `/<ns1>-<id1>/<ns2>-<id2>/...`. The leading levels are the ownership
//! scope, the last level is the document's type tag and local key:
//!
//! | Document        | Path                                      |
//! |-----------------|-------------------------------------------|
//! | Settings        | `/acct-{account}/settings`                |
//! | Search          | `/acct-{account}/d-{version}/search-{hex}`|
//! | Profile link    | `/acct-{account}/p-{profile}`             |
//! | Loadout         | `/p-{profile}/d-{version}/ld-{uuid}`      |
//! | Item annotation | `/p-{profile}/d-{version}/ia-{item}`      |
//! | Item hash tag   | `/p-{profile}/d-2/iht-{hash}`             |
//! | Tracked triumph | `/p-{profile}/d-2/tt-{hash}`              |
//! | App             | `/app-{id}`                               |
//! | Global settings | `/gs-{stage}`                             |
//!
//! Ids are rendered canonically: integers and hashes in decimal, UUIDs as 32
//! lowercase hex digits, digests as lowercase hex. Parsing rejects any other
//! spelling, so a raw key maps to exactly one [`KeyPath`] and back.
//!
//! Hashes enter key paths only as canonical `u32` values. Callers holding a
//! possibly sign-extended hash must run it through
//! [`normalize_hash`](dim_sync_types::normalize_hash) first; a path built
//! from the signed spelling would sort outside the range the unsigned
//! spelling's prefix scan covers.

use std::{fmt, str::FromStr};

use dim_sync_types::{AccountId, DestinyVersion, ItemId, ProfileId};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use snafu::{Snafu, ensure};
use uuid::Uuid;

/// Length of a search query digest in bytes.
pub const QUERY_DIGEST_LEN: usize = 16;

/// Errors produced when building or parsing key paths.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
pub enum KeyError {
    /// A key path must have at least one level.
    #[snafu(display("key path has no levels"))]
    Empty,

    /// Raw keys start with `/`.
    #[snafu(display("key {raw:?} does not start with '/'"))]
    MissingLeadingSlash {
        /// The rejected key.
        raw: String,
    },

    /// A `//` or trailing `/` in a raw key.
    #[snafu(display("key {raw:?} has an empty level"))]
    EmptySegment {
        /// The rejected key.
        raw: String,
    },

    /// The namespace of a level is not known.
    #[snafu(display("unknown namespace {namespace:?}"))]
    UnknownNamespace {
        /// The unrecognized namespace text.
        namespace: String,
    },

    /// The id does not fit the namespace's id kind, or is not canonical.
    #[snafu(display("invalid id {id:?} for namespace {namespace}: {reason}"))]
    InvalidId {
        /// Namespace of the level.
        namespace: Namespace,
        /// The rejected id text.
        id: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ============================================================================
// Levels
// ============================================================================

/// Kind of identifier a namespace carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Unsigned integer, rendered in decimal.
    Int,
    /// UUID, rendered as 32 lowercase hex digits.
    Uuid,
    /// Fixed 16-byte digest, rendered as lowercase hex.
    Digest,
    /// Free-form name without `/`.
    Name,
    /// No id; the level is the bare namespace.
    Unit,
}

/// Namespace of one key path level.
///
/// Declaration order is the sort order of levels sharing a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    /// Account scope.
    Account,
    /// Account settings document.
    Settings,
    /// Destiny version scope.
    Destiny,
    /// Search document.
    Search,
    /// Profile scope, or a profile link under an account.
    Profile,
    /// Loadout document.
    Loadout,
    /// Item annotation document.
    ItemAnnotation,
    /// Item hash tag document.
    ItemHashTag,
    /// Tracked triumph document.
    Triumph,
    /// App registration document.
    App,
    /// Global settings document.
    GlobalSettings,
}

impl Namespace {
    /// Every namespace.
    pub const ALL: [Namespace; 11] = [
        Namespace::Account,
        Namespace::Settings,
        Namespace::Destiny,
        Namespace::Search,
        Namespace::Profile,
        Namespace::Loadout,
        Namespace::ItemAnnotation,
        Namespace::ItemHashTag,
        Namespace::Triumph,
        Namespace::App,
        Namespace::GlobalSettings,
    ];

    /// Text used in raw keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Namespace::Account => "acct",
            Namespace::Settings => "settings",
            Namespace::Destiny => "d",
            Namespace::Search => "search",
            Namespace::Profile => "p",
            Namespace::Loadout => "ld",
            Namespace::ItemAnnotation => "ia",
            Namespace::ItemHashTag => "iht",
            Namespace::Triumph => "tt",
            Namespace::App => "app",
            Namespace::GlobalSettings => "gs",
        }
    }

    /// Kind of id levels in this namespace carry.
    pub const fn id_kind(self) -> IdKind {
        match self {
            Namespace::Account
            | Namespace::Destiny
            | Namespace::Profile
            | Namespace::ItemAnnotation
            | Namespace::ItemHashTag
            | Namespace::Triumph => IdKind::Int,
            Namespace::Loadout => IdKind::Uuid,
            Namespace::Search => IdKind::Digest,
            Namespace::App | Namespace::GlobalSettings => IdKind::Name,
            Namespace::Settings => IdKind::Unit,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Namespace::ALL
            .into_iter()
            .find(|ns| ns.as_str() == s)
            .ok_or_else(|| KeyError::UnknownNamespace { namespace: s.to_string() })
    }
}

/// Identifier of one key path level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyId {
    /// Integer id.
    Int(u64),
    /// UUID id.
    Uuid(Uuid),
    /// Digest id.
    Digest([u8; QUERY_DIGEST_LEN]),
    /// Name id.
    Name(String),
    /// No id.
    Unit,
}

impl KeyId {
    /// Kind of this id.
    pub const fn kind(&self) -> IdKind {
        match self {
            KeyId::Int(_) => IdKind::Int,
            KeyId::Uuid(_) => IdKind::Uuid,
            KeyId::Digest(_) => IdKind::Digest,
            KeyId::Name(_) => IdKind::Name,
            KeyId::Unit => IdKind::Unit,
        }
    }

    /// Integer value, if this is an integer id.
    pub const fn as_int(&self) -> Option<u64> {
        match self {
            KeyId::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// UUID value, if this is a UUID id.
    pub const fn as_uuid(&self) -> Option<Uuid> {
        match self {
            KeyId::Uuid(value) => Some(*value),
            _ => None,
        }
    }

    /// Name value, if this is a name id.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            KeyId::Name(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Int(value) => write!(f, "{value}"),
            KeyId::Uuid(value) => write!(f, "{}", value.simple()),
            KeyId::Digest(bytes) => f.write_str(&hex::encode(bytes)),
            KeyId::Name(name) => f.write_str(name),
            KeyId::Unit => Ok(()),
        }
    }
}

/// One `(namespace, id)` level of a key path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyLevel {
    namespace: Namespace,
    id: KeyId,
}

impl KeyLevel {
    /// Builds a level, checking that the id fits the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidId`] if the id kind does not match the
    /// namespace, or a name is empty or contains `/`.
    pub fn new(namespace: Namespace, id: KeyId) -> Result<Self, KeyError> {
        ensure!(
            id.kind() == namespace.id_kind(),
            InvalidIdSnafu {
                namespace,
                id: id.to_string(),
                reason: format!("expected {:?} id", namespace.id_kind()),
            }
        );
        if let KeyId::Name(name) = &id {
            ensure!(
                !name.is_empty() && !name.contains('/'),
                InvalidIdSnafu { namespace, id: name.clone(), reason: "names are non-empty and contain no '/'" }
            );
        }
        Ok(Self { namespace, id })
    }

    /// Builds an integer level. The caller guarantees the namespace is integer-keyed.
    const fn int(namespace: Namespace, value: u64) -> Self {
        Self { namespace, id: KeyId::Int(value) }
    }

    const fn unit(namespace: Namespace) -> Self {
        Self { namespace, id: KeyId::Unit }
    }

    /// Account scope level.
    pub const fn account(account: AccountId) -> Self {
        Self::int(Namespace::Account, account.value())
    }

    /// Profile scope level.
    pub const fn profile(profile: ProfileId) -> Self {
        Self::int(Namespace::Profile, profile.value())
    }

    /// Destiny version scope level.
    pub const fn destiny(version: DestinyVersion) -> Self {
        Self::int(Namespace::Destiny, version.as_u8() as u64)
    }

    /// Namespace of the level.
    pub const fn namespace(&self) -> Namespace {
        self.namespace
    }

    /// Id of the level.
    pub const fn id(&self) -> &KeyId {
        &self.id
    }

    fn parse(segment: &str) -> Result<Self, KeyError> {
        let (ns_text, id_text) = match segment.split_once('-') {
            Some((ns, id)) => (ns, Some(id)),
            None => (segment, None),
        };
        let namespace: Namespace = ns_text.parse()?;
        let invalid = |id: &str, reason: &str| KeyError::InvalidId {
            namespace,
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let id = match (namespace.id_kind(), id_text) {
            (IdKind::Unit, None) => KeyId::Unit,
            (IdKind::Unit, Some(id)) => return Err(invalid(id, "namespace takes no id")),
            (_, None) => return Err(invalid("", "missing id")),
            (IdKind::Int, Some(id)) => {
                let value: u64 = id.parse().map_err(|_| invalid(id, "not an unsigned integer"))?;
                if value.to_string() != id {
                    return Err(invalid(id, "integer is not in canonical decimal form"));
                }
                if namespace == Namespace::Destiny
                    && u8::try_from(value).ok().and_then(DestinyVersion::from_u8).is_none()
                {
                    return Err(invalid(id, "not a known destiny version"));
                }
                KeyId::Int(value)
            },
            (IdKind::Uuid, Some(id)) => {
                let value = Uuid::try_parse(id).map_err(|_| invalid(id, "not a uuid"))?;
                if value.simple().to_string() != id {
                    return Err(invalid(id, "uuid is not 32 lowercase hex digits"));
                }
                KeyId::Uuid(value)
            },
            (IdKind::Digest, Some(id)) => {
                let bytes = hex::decode(id).map_err(|_| invalid(id, "not hex"))?;
                let digest: [u8; QUERY_DIGEST_LEN] =
                    bytes.try_into().map_err(|_| invalid(id, "digest has the wrong length"))?;
                if hex::encode(digest) != id {
                    return Err(invalid(id, "digest is not lowercase hex"));
                }
                KeyId::Digest(digest)
            },
            (IdKind::Name, Some(id)) => {
                if id.is_empty() {
                    return Err(invalid(id, "empty name"));
                }
                KeyId::Name(id.to_string())
            },
        };
        Ok(Self { namespace, id })
    }
}

impl fmt::Display for KeyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            KeyId::Unit => write!(f, "{}", self.namespace),
            _ => write!(f, "{}-{}", self.namespace, self.id),
        }
    }
}

// ============================================================================
// Paths and Prefixes
// ============================================================================

/// Full address of one document.
///
/// Ordering is structural (level by level), so every path under a given
/// [`KeyPrefix`] forms one contiguous range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyPath {
    levels: Vec<KeyLevel>,
}

impl KeyPath {
    /// Builds a key path from its levels.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Empty`] if `levels` is empty.
    pub fn build(levels: Vec<KeyLevel>) -> Result<Self, KeyError> {
        ensure!(!levels.is_empty(), EmptySnafu);
        Ok(Self { levels })
    }

    /// Parses a raw key back into its levels.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] if the key is malformed, names an unknown
    /// namespace, or spells an id non-canonically.
    pub fn parse(raw: &str) -> Result<Self, KeyError> {
        let rest = raw
            .strip_prefix('/')
            .ok_or_else(|| KeyError::MissingLeadingSlash { raw: raw.to_string() })?;
        let levels = rest
            .split('/')
            .map(|segment| {
                ensure!(!segment.is_empty(), EmptySegmentSnafu { raw });
                KeyLevel::parse(segment)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::build(levels)
    }

    /// Levels of the path, outermost first.
    pub fn levels(&self) -> &[KeyLevel] {
        &self.levels
    }

    /// Innermost level, which names the document's type and local key.
    pub fn leaf(&self) -> Option<&KeyLevel> {
        self.levels.last()
    }

    /// Whether the path starts with the given levels.
    pub fn starts_with(&self, levels: &[KeyLevel]) -> bool {
        self.levels.starts_with(levels)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in &self.levels {
            write!(f, "/{level}")?;
        }
        Ok(())
    }
}

impl FromStr for KeyPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyPath::parse(s)
    }
}

/// Range of documents nested under some levels, optionally narrowed to one
/// type namespace directly below them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyPrefix {
    levels: Vec<KeyLevel>,
    kind: Option<Namespace>,
}

impl KeyPrefix {
    /// Everything nested under `levels`.
    pub fn build(levels: Vec<KeyLevel>) -> Self {
        Self { levels, kind: None }
    }

    /// Documents of one type directly under `levels`.
    pub fn of_kind(levels: Vec<KeyLevel>, kind: Namespace) -> Self {
        Self { levels, kind: Some(kind) }
    }

    /// Every document in the store.
    pub fn all() -> Self {
        Self { levels: Vec::new(), kind: None }
    }

    /// Scope levels of the prefix.
    pub fn levels(&self) -> &[KeyLevel] {
        &self.levels
    }

    /// Type filter, if any.
    pub const fn kind(&self) -> Option<Namespace> {
        self.kind
    }

    /// Whether `key` falls in this range.
    pub fn matches(&self, key: &KeyPath) -> bool {
        if !key.starts_with(&self.levels) {
            return false;
        }
        match self.kind {
            None => true,
            Some(kind) => {
                key.levels().get(self.levels.len()).is_some_and(|level| level.namespace == kind)
            },
        }
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for level in &self.levels {
            write!(f, "/{level}")?;
        }
        match self.kind {
            Some(kind) if kind.id_kind() == IdKind::Unit => write!(f, "/{kind}"),
            Some(kind) => write!(f, "/{kind}-*"),
            None if self.levels.is_empty() => f.write_str("/"),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Document Addresses
// ============================================================================

/// Everything owned directly by an account: settings, searches and profile links.
pub fn account_scope(account: AccountId) -> KeyPrefix {
    KeyPrefix::build(vec![KeyLevel::account(account)])
}

/// Everything stored for one profile, across versions.
pub fn profile_scope(profile: ProfileId) -> KeyPrefix {
    KeyPrefix::build(vec![KeyLevel::profile(profile)])
}

/// One profile's documents for one game version.
pub fn profile_version_scope(profile: ProfileId, version: DestinyVersion) -> KeyPrefix {
    KeyPrefix::build(vec![KeyLevel::profile(profile), KeyLevel::destiny(version)])
}

/// Documents of one type for a profile and version.
pub fn profile_kind_prefix(
    profile: ProfileId,
    version: DestinyVersion,
    kind: Namespace,
) -> KeyPrefix {
    KeyPrefix::of_kind(vec![KeyLevel::profile(profile), KeyLevel::destiny(version)], kind)
}

/// An account's searches for one game version.
pub fn search_prefix(account: AccountId, version: DestinyVersion) -> KeyPrefix {
    KeyPrefix::of_kind(
        vec![KeyLevel::account(account), KeyLevel::destiny(version)],
        Namespace::Search,
    )
}

/// Links from an account to the profiles it has written data for.
pub fn profile_links_prefix(account: AccountId) -> KeyPrefix {
    KeyPrefix::of_kind(vec![KeyLevel::account(account)], Namespace::Profile)
}

/// All app registrations.
pub fn apps_prefix() -> KeyPrefix {
    KeyPrefix::of_kind(Vec::new(), Namespace::App)
}

/// Address of an account's settings document.
pub fn settings_key(account: AccountId) -> KeyPath {
    KeyPath { levels: vec![KeyLevel::account(account), KeyLevel::unit(Namespace::Settings)] }
}

/// Address of a search, keyed by the digest of its canonical query.
pub fn search_key(
    account: AccountId,
    version: DestinyVersion,
    digest: [u8; QUERY_DIGEST_LEN],
) -> KeyPath {
    KeyPath {
        levels: vec![
            KeyLevel::account(account),
            KeyLevel::destiny(version),
            KeyLevel { namespace: Namespace::Search, id: KeyId::Digest(digest) },
        ],
    }
}

/// Address of the link recording that `account` owns `profile`.
pub fn profile_link_key(account: AccountId, profile: ProfileId) -> KeyPath {
    KeyPath { levels: vec![KeyLevel::account(account), KeyLevel::profile(profile)] }
}

/// Address of a loadout.
pub fn loadout_key(profile: ProfileId, version: DestinyVersion, id: Uuid) -> KeyPath {
    KeyPath {
        levels: vec![
            KeyLevel::profile(profile),
            KeyLevel::destiny(version),
            KeyLevel { namespace: Namespace::Loadout, id: KeyId::Uuid(id) },
        ],
    }
}

/// Address of an item annotation.
pub fn annotation_key(profile: ProfileId, version: DestinyVersion, item: ItemId) -> KeyPath {
    KeyPath {
        levels: vec![
            KeyLevel::profile(profile),
            KeyLevel::destiny(version),
            KeyLevel::int(Namespace::ItemAnnotation, item.value()),
        ],
    }
}

/// Address of an item hash tag. Hash tags only exist for Destiny 2.
pub fn hash_tag_key(profile: ProfileId, item_hash: u32) -> KeyPath {
    KeyPath {
        levels: vec![
            KeyLevel::profile(profile),
            KeyLevel::destiny(DestinyVersion::D2),
            KeyLevel::int(Namespace::ItemHashTag, u64::from(item_hash)),
        ],
    }
}

/// Address of a tracked triumph. Triumphs only exist for Destiny 2.
pub fn triumph_key(profile: ProfileId, record_hash: u32) -> KeyPath {
    KeyPath {
        levels: vec![
            KeyLevel::profile(profile),
            KeyLevel::destiny(DestinyVersion::D2),
            KeyLevel::int(Namespace::Triumph, u64::from(record_hash)),
        ],
    }
}

/// Address of an app registration.
///
/// # Errors
///
/// Returns [`KeyError::InvalidId`] if `id` is empty or contains `/`.
pub fn app_key(id: &str) -> Result<KeyPath, KeyError> {
    KeyPath::build(vec![KeyLevel::new(Namespace::App, KeyId::Name(id.to_string()))?])
}

/// Address of the global settings for one deployment stage.
///
/// # Errors
///
/// Returns [`KeyError::InvalidId`] if `stage` is empty or contains `/`.
pub fn global_settings_key(stage: &str) -> Result<KeyPath, KeyError> {
    KeyPath::build(vec![KeyLevel::new(Namespace::GlobalSettings, KeyId::Name(stage.to_string()))?])
}

/// Digest identifying a canonical search query: the first 16 bytes of its SHA-256.
pub fn query_digest(canonical_query: &str) -> [u8; QUERY_DIGEST_LEN] {
    let hash = Sha256::digest(canonical_query.as_bytes());
    let mut digest = [0u8; QUERY_DIGEST_LEN];
    digest.copy_from_slice(&hash[..QUERY_DIGEST_LEN]);
    digest
}
