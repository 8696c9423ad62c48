//! Identifier types shared by both stores.
//!
//! Identifiers are newtypes over their canonical numeric representation so that
//! an account id can never be passed where a profile id is expected. Item and
//! record hashes are canonical `u32`; values arriving from older schemas as
//! sign-extended `i32` are normalized once, at the encode boundary, by
//! [`normalize_hash`].

use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

// ============================================================================
// Identifier Types
// ============================================================================

/// Generates a newtype wrapper around a numeric type for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `account:123`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <$inner as std::str::FromStr>::Err;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

define_id!(
    /// Bungie.net account identifier. Owns settings and searches, and every
    /// profile linked to the account.
    ///
    /// # Display
    ///
    /// Formats with `account:` prefix: `account:4321`.
    AccountId, u64, "account"
);

define_id!(
    /// Platform membership identifier of a Destiny profile.
    ///
    /// # Display
    ///
    /// Formats with `profile:` prefix: `profile:4611686018400000000`.
    ProfileId, u64, "profile"
);

define_id!(
    /// Instance identifier of a single inventory item.
    ///
    /// # Display
    ///
    /// Formats with `item:` prefix: `item:6917529000000000000`.
    ItemId, u64, "item"
);

/// Destiny game version a profile's data belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum DestinyVersion {
    /// Destiny 1.
    D1 = 1,
    /// Destiny 2.
    #[default]
    D2 = 2,
}

impl DestinyVersion {
    /// Returns the numeric version.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a numeric version, returning `None` for unknown versions.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::D1),
            2 => Some(Self::D2),
            _ => None,
        }
    }
}

impl TryFrom<u8> for DestinyVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_u8(value).ok_or_else(|| format!("unknown destiny version {value}"))
    }
}

impl From<DestinyVersion> for u8 {
    fn from(version: DestinyVersion) -> Self {
        version.as_u8()
    }
}

impl fmt::Display for DestinyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.as_u8())
    }
}

/// The two stores an account's data can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    /// The relational source-of-truth store being migrated away from.
    Legacy,
    /// The hierarchical document store being migrated to.
    Document,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Legacy => write!(f, "legacy"),
            StoreKind::Document => write!(f, "document"),
        }
    }
}

// ============================================================================
// Hash Normalization
// ============================================================================

/// A hash value that cannot be represented as a canonical `u32`.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(display("hash {value} is outside the i32/u32 range"))]
pub struct HashRangeError {
    /// The rejected raw value.
    pub value: i64,
}

/// Normalizes an item or record hash to its canonical unsigned form.
///
/// Hashes are unsigned 32-bit values, but some historical rows stored them as
/// signed `i32`, so a hash above `i32::MAX` can arrive sign-extended (e.g. `-1`
/// for `4294967295`). Both spellings map to the same `u32`; anything outside
/// `i32::MIN..=u32::MAX` is rejected.
///
/// # Errors
///
/// Returns [`HashRangeError`] when the value cannot be a 32-bit hash.
pub fn normalize_hash(value: i64) -> Result<u32, HashRangeError> {
    if let Ok(unsigned) = u32::try_from(value) {
        return Ok(unsigned);
    }
    match i32::try_from(value) {
        Ok(signed) => Ok(signed as u32),
        Err(_) => Err(HashRangeError { value }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_prefix() {
        assert_eq!(AccountId::new(4321).to_string(), "account:4321");
        assert_eq!(ProfileId::new(7).to_string(), "profile:7");
        assert_eq!(ItemId::new(9).to_string(), "item:9");
    }

    #[test]
    fn test_id_from_str() {
        let id: AccountId = "4321".parse().expect("parse");
        assert_eq!(id, AccountId::new(4321));
        assert!("-1".parse::<AccountId>().is_err());
    }

    #[test]
    fn test_destiny_version_serde_is_numeric() {
        let json = serde_json::to_string(&DestinyVersion::D1).expect("serialize");
        assert_eq!(json, "1");
        let parsed: DestinyVersion = serde_json::from_str("2").expect("deserialize");
        assert_eq!(parsed, DestinyVersion::D2);
        assert!(serde_json::from_str::<DestinyVersion>("3").is_err());
    }

    #[test]
    fn test_normalize_hash_unsigned_passthrough() {
        assert_eq!(normalize_hash(0).unwrap(), 0);
        assert_eq!(normalize_hash(3_159_615_086).unwrap(), 3_159_615_086);
        assert_eq!(normalize_hash(i64::from(u32::MAX)).unwrap(), u32::MAX);
    }

    #[test]
    fn test_normalize_hash_sign_extended() {
        assert_eq!(normalize_hash(-1).unwrap(), u32::MAX);
        // 3159615086 stored as i32
        assert_eq!(normalize_hash(-1_135_352_210).unwrap(), 3_159_615_086);
        assert_eq!(normalize_hash(i64::from(i32::MIN)).unwrap(), 0x8000_0000);
    }

    #[test]
    fn test_normalize_hash_out_of_range() {
        assert!(normalize_hash(i64::from(u32::MAX) + 1).is_err());
        assert!(normalize_hash(i64::from(i32::MIN) - 1).is_err());
    }
}
