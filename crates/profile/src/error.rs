//! Error types for the profile adapters.

use dim_sync_store::{KeyError, StoreError};
use dim_sync_types::{AccountId, CodecError, ErrorCode};
use snafu::Snafu;

/// Result type alias for profile operations.
pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

/// Errors from the document adapter, the relational store and the app cache.
///
/// # Recovery Guide
///
/// | Variant                  | Retryable      | Recovery Action                             |
/// | ------------------------ | -------------- | ------------------------------------------- |
/// | `Store`                  | Per source     | See [`StoreError`]                          |
/// | `GlobalStore`            | Per source     | See [`StoreError`]                          |
/// | `LegacyUnavailable`      | Yes            | Retry with backoff                          |
/// | `Codec`                  | No             | Report; the stored record is unreadable     |
/// | `UnrecognizedKey`        | No             | Report; a document has an unknown address   |
/// | `InvalidRecord`          | No             | Fix the record                              |
/// | `ProfileRequired`        | No             | Send the platform membership id             |
/// | `SyncTokenScopeMismatch` | No             | Discard the token and read in full          |
/// | `Key`                    | No             | Fix the key                                 |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProfileError {
    /// A document store call failed.
    #[snafu(display("{operation} for {account} failed: {source}"))]
    Store {
        /// Account the call was made for.
        account: AccountId,
        /// Adapter operation.
        operation: String,
        /// The underlying store error.
        source: StoreError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A document store call outside any account's scope failed.
    #[snafu(display("{operation} failed: {source}"))]
    GlobalStore {
        /// Adapter operation.
        operation: String,
        /// The underlying store error.
        source: StoreError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// The relational store could not be reached.
    #[snafu(display("legacy store unavailable during {operation}: {message}"))]
    LegacyUnavailable {
        /// Operation that failed.
        operation: String,
        /// Error description.
        message: String,
    },

    /// A stored record could not be encoded or decoded.
    #[snafu(display("codec error for {key}: {source}"))]
    Codec {
        /// Key of the affected document.
        key: String,
        /// The underlying codec error.
        source: CodecError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A document's key does not belong to any known entity kind.
    #[snafu(display("unrecognized document key {key}"))]
    UnrecognizedKey {
        /// The raw key.
        key: String,
    },

    /// A domain record cannot be stored.
    #[snafu(display("invalid {kind}: {message}"))]
    InvalidRecord {
        /// Entity kind.
        kind: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// A profile-scoped action arrived without a profile.
    #[snafu(display("{action} requires a platform membership id"))]
    ProfileRequired {
        /// The action.
        action: &'static str,
    },

    /// A sync token was presented for another scope than it was issued for.
    #[snafu(display("sync token was issued for {issued_for}, not {requested}"))]
    SyncTokenScopeMismatch {
        /// Scope the token covers.
        issued_for: String,
        /// Scope the caller asked for.
        requested: String,
    },

    /// A key could not be built.
    #[snafu(display("invalid key: {source}"))]
    Key {
        /// The underlying key error.
        source: KeyError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

impl ProfileError {
    /// Machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProfileError::Store { source, .. } | ProfileError::GlobalStore { source, .. } => {
                source.code()
            },
            ProfileError::LegacyUnavailable { .. } => ErrorCode::StoreUnavailable,
            ProfileError::Codec { .. } => ErrorCode::Serialization,
            ProfileError::UnrecognizedKey { .. } => ErrorCode::Internal,
            ProfileError::InvalidRecord { .. }
            | ProfileError::ProfileRequired { .. }
            | ProfileError::Key { .. } => ErrorCode::InvalidArgument,
            ProfileError::SyncTokenScopeMismatch { .. } => ErrorCode::InvalidSyncToken,
        }
    }

    /// Whether the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_their_code() {
        let err = ProfileError::Store {
            account: AccountId::new(1),
            operation: "export_user".into(),
            source: StoreError::Timeout { operation: "begin_list".into(), timeout_ms: 5000 },
            location: snafu::location!(),
        };
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("export_user for account:1 failed"));
    }

    #[test]
    fn test_invalid_record_is_not_retryable() {
        let err = ProfileError::InvalidRecord { kind: "tag", message: "bad item id".into() };
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(!err.is_retryable());
    }
}
