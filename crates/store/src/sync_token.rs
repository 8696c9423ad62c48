//! Sync tokens and change events.
//!
//! A sync token is opaque to callers and carries:
//! - the store instance that issued it, so tokens never cross stores
//! - the prefix the list was taken over, so it cannot be replayed elsewhere
//! - the window end of a bounded list, so later changes past it are flagged
//! - the change-log watermark at issue time
//!
//! The payload is authenticated with a truncated HMAC-SHA256; a token that
//! fails authentication, or comes from another store, is rejected instead of
//! silently syncing the wrong range.

use std::{collections::BTreeMap, fmt};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dim_sync_types::{decode, encode};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{ResultExt, ensure};

use crate::{
    client::Document,
    error::{CodecSnafu, InvalidSyncTokenSnafu, Result, TokenScopeMismatchSnafu},
    keys::{KeyPath, KeyPrefix},
};

/// Token format version.
const TOKEN_VERSION: u8 = 1;

/// HMAC key length in bytes.
const HMAC_KEY_LENGTH: usize = 32;

/// HMAC output length (truncated).
const HMAC_LENGTH: usize = 16;

/// Label used for codec errors on token bytes.
const TOKEN_LABEL: &str = "<sync token>";

/// Opaque cursor returned by list and sync reads.
///
/// Each sync call returns a new token superseding the one presented.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SyncToken(Vec<u8>);

impl SyncToken {
    /// Wraps raw token bytes, e.g. as stored by a client.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Raw token bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the token, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// URL-safe base64 form, suitable for HTTP responses.
    pub fn to_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }

    /// Parses the base64 form.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::InvalidSyncToken`] if `encoded` is not URL-safe base64.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| InvalidSyncTokenSnafu { reason: "not url-safe base64" }.build())?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncToken({})", self.to_base64())
    }
}

impl fmt::Display for SyncToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Authenticated contents of a sync token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Token format version.
    pub version: u8,
    /// Instance id of the issuing store.
    pub store_id: u64,
    /// Range the list was taken over.
    pub prefix: KeyPrefix,
    /// Last key returned by a truncated list; `None` for a full list.
    pub window_end: Option<KeyPath>,
    /// Change-log sequence number at issue time.
    pub watermark: u64,
}

impl TokenPayload {
    /// Whether `key` lies inside the window the holder has seen.
    pub fn in_window(&self, key: &KeyPath) -> bool {
        self.window_end.as_ref().is_none_or(|end| key <= end)
    }
}

#[derive(Serialize, Deserialize)]
struct SignedToken {
    payload: TokenPayload,
    mac: [u8; HMAC_LENGTH],
}

/// Issues and verifies tokens for one store instance.
#[derive(Clone)]
pub struct SyncTokenCodec {
    store_id: u64,
    key: [u8; HMAC_KEY_LENGTH],
}

impl SyncTokenCodec {
    /// Creates a codec for the given store instance and secret key.
    pub fn new(store_id: u64, key: [u8; HMAC_KEY_LENGTH]) -> Self {
        Self { store_id, key }
    }

    /// Creates a codec with a random instance id and key.
    pub fn with_random_key() -> Self {
        Self { store_id: rand::random(), key: rand::random() }
    }

    /// Instance id embedded in every token.
    pub const fn store_id(&self) -> u64 {
        self.store_id
    }

    /// Issues a token for a list over `prefix` ending at `watermark`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Codec`] if the payload cannot be encoded.
    pub fn issue(
        &self,
        prefix: &KeyPrefix,
        window_end: Option<KeyPath>,
        watermark: u64,
    ) -> Result<SyncToken> {
        let payload = TokenPayload {
            version: TOKEN_VERSION,
            store_id: self.store_id,
            prefix: prefix.clone(),
            window_end,
            watermark,
        };
        let payload_bytes = encode(&payload).context(CodecSnafu { key: TOKEN_LABEL })?;
        let tag = self.mac(&payload_bytes)?.finalize().into_bytes();
        let mut mac = [0u8; HMAC_LENGTH];
        mac.copy_from_slice(&tag[..HMAC_LENGTH]);
        let bytes = encode(&SignedToken { payload, mac }).context(CodecSnafu { key: TOKEN_LABEL })?;
        Ok(SyncToken(bytes))
    }

    /// Verifies a token and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::InvalidSyncToken`] if the token is
    /// malformed, fails authentication, has an unknown version, or was issued
    /// by another store instance.
    pub fn open(&self, token: &SyncToken) -> Result<TokenPayload> {
        let signed: SignedToken = decode(token.as_bytes())
            .map_err(|_| InvalidSyncTokenSnafu { reason: "malformed token" }.build())?;
        let payload_bytes = encode(&signed.payload).context(CodecSnafu { key: TOKEN_LABEL })?;
        self.mac(&payload_bytes)?
            .verify_truncated_left(&signed.mac)
            .map_err(|_| InvalidSyncTokenSnafu { reason: "authentication failed" }.build())?;
        let payload = signed.payload;
        ensure!(
            payload.version == TOKEN_VERSION,
            InvalidSyncTokenSnafu { reason: format!("unsupported version {}", payload.version) }
        );
        ensure!(
            payload.store_id == self.store_id,
            InvalidSyncTokenSnafu { reason: "issued by another store" }
        );
        Ok(payload)
    }

    /// Verifies a token and checks it was issued for `prefix`.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open), plus [`crate::StoreError::TokenScopeMismatch`]
    /// if the token covers another prefix.
    pub fn open_for(&self, token: &SyncToken, prefix: &KeyPrefix) -> Result<TokenPayload> {
        let payload = self.open(token)?;
        ensure!(
            payload.prefix == *prefix,
            TokenScopeMismatchSnafu {
                issued_for: payload.prefix.to_string(),
                requested: prefix.to_string(),
            }
        );
        Ok(payload)
    }

    fn mac(&self, payload: &[u8]) -> Result<Hmac<Sha256>> {
        let mut mac = <Hmac<Sha256>>::new_from_slice(&self.key)
            .map_err(|_| InvalidSyncTokenSnafu { reason: "invalid codec key" }.build())?;
        mac.update(payload);
        Ok(mac)
    }
}

impl fmt::Debug for SyncTokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTokenCodec").field("store_id", &self.store_id).finish_non_exhaustive()
    }
}

// ============================================================================
// Change Events
// ============================================================================

/// One change reported by a sync read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The document was created or updated.
    Changed(Document),
    /// The document was removed.
    Deleted(KeyPath),
    /// The token is too old; discard local state and list again.
    Reset,
    /// A document past the listed window changed; its contents are not included.
    UpdatedOutsideWindow(KeyPath),
}

impl ChangeEvent {
    /// Key the event concerns; `None` for [`ChangeEvent::Reset`].
    pub fn key(&self) -> Option<&KeyPath> {
        match self {
            ChangeEvent::Changed(doc) => Some(&doc.key),
            ChangeEvent::Deleted(key) | ChangeEvent::UpdatedOutsideWindow(key) => Some(key),
            ChangeEvent::Reset => None,
        }
    }
}

/// Merges change events into a locally held collection.
///
/// `Changed` upserts by key, `Deleted` and `UpdatedOutsideWindow` remove by
/// key, `Reset` clears everything. Returns `true` if a reset was seen and
/// the caller must list again.
pub fn merge_events(
    local: &mut BTreeMap<KeyPath, Document>,
    events: impl IntoIterator<Item = ChangeEvent>,
) -> bool {
    let mut needs_relist = false;
    for event in events {
        match event {
            ChangeEvent::Changed(doc) => {
                local.insert(doc.key.clone(), doc);
            },
            ChangeEvent::Deleted(key) | ChangeEvent::UpdatedOutsideWindow(key) => {
                local.remove(&key);
            },
            ChangeEvent::Reset => {
                local.clear();
                needs_relist = true;
            },
        }
    }
    needs_relist
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use chrono::Utc;
    use dim_sync_types::{AccountId, DestinyVersion, ProfileId};

    use super::*;
    use crate::{
        StoreError,
        keys::{account_scope, profile_scope, search_prefix, settings_key},
    };

    fn codec() -> SyncTokenCodec {
        SyncTokenCodec::new(7, [42u8; HMAC_KEY_LENGTH])
    }

    fn doc(key: KeyPath, version: u64) -> Document {
        let now = Utc::now();
        Document { key, value: vec![version as u8], version, created_at: now, updated_at: now }
    }

    #[test]
    fn test_issue_then_open() {
        let prefix = account_scope(AccountId::new(1));
        let token = codec().issue(&prefix, None, 12).expect("issue");
        let payload = codec().open_for(&token, &prefix).expect("open");
        assert_eq!(payload.watermark, 12);
        assert_eq!(payload.store_id, 7);
        assert!(payload.window_end.is_none());

        let parsed = SyncToken::from_base64(&token.to_base64()).expect("base64");
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let token = codec().issue(&KeyPrefix::all(), None, 3).expect("issue");
        let mut bytes = token.into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let err = codec().open(&SyncToken::from_bytes(bytes)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidSyncToken { .. }), "unexpected {err:?}");
    }

    #[test]
    fn test_token_from_other_store_rejected() {
        let token = codec().issue(&KeyPrefix::all(), None, 3).expect("issue");

        // Same key, different instance.
        let other = SyncTokenCodec::new(8, [42u8; HMAC_KEY_LENGTH]);
        let err = other.open(&token).unwrap_err();
        assert!(err.to_string().contains("another store"), "{err}");

        // Different key.
        let rekeyed = SyncTokenCodec::new(7, [1u8; HMAC_KEY_LENGTH]);
        let err = rekeyed.open(&token).unwrap_err();
        assert!(err.to_string().contains("authentication"), "{err}");
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(codec().open(&SyncToken::from_bytes(vec![0xFF; 3])).is_err());
        assert!(SyncToken::from_base64("not base64 !!").is_err());
    }

    #[test]
    fn test_token_scope_mismatch() {
        let account = AccountId::new(5);
        let token = codec().issue(&account_scope(account), None, 0).expect("issue");
        let err = codec().open_for(&token, &search_prefix(account, DestinyVersion::D2)).unwrap_err();
        assert!(matches!(err, StoreError::TokenScopeMismatch { .. }), "unexpected {err:?}");
        assert_eq!(err.code(), dim_sync_types::ErrorCode::InvalidSyncToken);
    }

    #[test]
    fn test_window_membership() {
        let early = settings_key(AccountId::new(1));
        let late = settings_key(AccountId::new(9));
        let token = codec()
            .issue(&KeyPrefix::all(), Some(settings_key(AccountId::new(5))), 0)
            .expect("issue");
        let payload = codec().open(&token).expect("open");
        assert!(payload.in_window(&early));
        assert!(!payload.in_window(&late));

        let full = codec().issue(&profile_scope(ProfileId::new(1)), None, 0).expect("issue");
        assert!(codec().open(&full).expect("open").in_window(&late));
    }

    #[test]
    fn test_merge_events() {
        let a = settings_key(AccountId::new(1));
        let b = settings_key(AccountId::new(2));
        let c = settings_key(AccountId::new(3));
        let mut local = BTreeMap::from([(a.clone(), doc(a.clone(), 1)), (b.clone(), doc(b.clone(), 2))]);

        let relist = merge_events(
            &mut local,
            vec![
                ChangeEvent::Changed(doc(a.clone(), 5)),
                ChangeEvent::Deleted(b.clone()),
                ChangeEvent::Changed(doc(c.clone(), 6)),
                ChangeEvent::UpdatedOutsideWindow(c.clone()),
            ],
        );
        assert!(!relist);
        assert_eq!(local.len(), 1);
        assert_eq!(local[&a].version, 5);

        assert!(merge_events(&mut local, vec![ChangeEvent::Reset]));
        assert!(local.is_empty());
    }
}
