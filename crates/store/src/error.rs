//! Error types for document store operations.

use dim_sync_types::{CodecError, ErrorCode};
use snafu::Snafu;

use crate::keys::KeyError;

/// Result type alias for store operations.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors returned by document store clients and the helpers built on them.
///
/// # Recovery Guide
///
/// | Variant                  | Retryable | Recovery Action                                  |
/// | ------------------------ | --------- | ------------------------------------------------ |
/// | `Unavailable`            | Yes       | Retry with backoff                               |
/// | `Timeout`                | Yes       | Retry with backoff                               |
/// | `Conflict`               | Yes       | Re-run the read-modify-write                     |
/// | `ConcurrentModification` | Yes       | Retry the request later                          |
/// | `AlreadyExists`          | No        | Wipe the destination scope or update instead     |
/// | `BatchTooLarge`          | No        | Split the batch with [`crate::batches`]          |
/// | `DuplicateKey`           | No        | De-duplicate the batch before writing            |
/// | `InvalidSyncToken`       | No        | Discard the token and list from scratch          |
/// | `TokenScopeMismatch`     | No        | Use the token only with the prefix it came from  |
/// | `Key`                    | No        | Fix the key                                      |
/// | `Codec`                  | No        | Report as an issue with the affected key         |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The store could not be reached or rejected the call.
    #[snafu(display("store unavailable during {operation}: {message}"))]
    Unavailable {
        /// Operation that failed.
        operation: String,
        /// Error description.
        message: String,
    },

    /// The store did not answer within the read timeout.
    #[snafu(display("{operation} timed out after {timeout_ms}ms"))]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// Another writer committed to a key this transaction read.
    #[snafu(display("concurrent write conflict on {key}"))]
    Conflict {
        /// The contended key.
        key: String,
    },

    /// An optimistic transaction kept conflicting until its retries ran out.
    #[snafu(display("concurrent modification of {key} after {attempts} attempts"))]
    ConcurrentModification {
        /// The contended key.
        key: String,
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// A must-not-exist put found an existing document.
    #[snafu(display("document {key} already exists"))]
    AlreadyExists {
        /// The existing key.
        key: String,
    },

    /// A batch exceeded the store's batch size limit.
    #[snafu(display("batch of {size} exceeds the limit of {max}"))]
    BatchTooLarge {
        /// Requested batch size.
        size: usize,
        /// Largest accepted batch.
        max: usize,
    },

    /// The same key appeared twice in one write batch.
    #[snafu(display("key {key} appears more than once in one batch"))]
    DuplicateKey {
        /// The repeated key.
        key: String,
    },

    /// A sync token was malformed, forged, or issued by another store.
    #[snafu(display("invalid sync token: {reason}"))]
    InvalidSyncToken {
        /// Why the token was rejected.
        reason: String,
    },

    /// A sync token was presented for a different prefix than it was issued for.
    #[snafu(display("sync token was issued for {issued_for}, not {requested}"))]
    TokenScopeMismatch {
        /// Prefix the token covers.
        issued_for: String,
        /// Prefix the caller asked to sync.
        requested: String,
    },

    /// A key could not be built or parsed.
    #[snafu(display("invalid key: {source}"))]
    Key {
        /// The underlying key error.
        source: KeyError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A stored value could not be encoded or decoded.
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
}

impl StoreError {
    /// Machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Unavailable { .. } | StoreError::Timeout { .. } => {
                ErrorCode::StoreUnavailable
            },
            StoreError::Conflict { .. } | StoreError::ConcurrentModification { .. } => {
                ErrorCode::ConcurrentModification
            },
            StoreError::AlreadyExists { .. } => ErrorCode::AlreadyExists,
            StoreError::BatchTooLarge { .. } | StoreError::DuplicateKey { .. } => {
                ErrorCode::InvalidArgument
            },
            StoreError::InvalidSyncToken { .. } | StoreError::TokenScopeMismatch { .. } => {
                ErrorCode::InvalidSyncToken
            },
            StoreError::Key { .. } => ErrorCode::InvalidArgument,
            StoreError::Codec { .. } => ErrorCode::Serialization,
        }
    }

    /// Whether the same call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Whether this is a single optimistic-transaction conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_codes() {
        let unavailable = StoreError::Unavailable { operation: "get".into(), message: "down".into() };
        assert_eq!(unavailable.code(), ErrorCode::StoreUnavailable);
        assert!(unavailable.is_retryable());

        let exists = StoreError::AlreadyExists { key: "/acct-1/settings".into() };
        assert_eq!(exists.code(), ErrorCode::AlreadyExists);
        assert!(!exists.is_retryable());

        let conflict = StoreError::Conflict { key: "/acct-1/settings".into() };
        assert!(conflict.is_conflict());
        let exhausted = StoreError::ConcurrentModification { key: "k".into(), attempts: 3 };
        assert!(!exhausted.is_conflict());
        assert_eq!(exhausted.code(), ErrorCode::ConcurrentModification);
    }

    #[test]
    fn test_timeout_display() {
        let err = StoreError::Timeout { operation: "begin_list".into(), timeout_ms: 1000 };
        assert_eq!(err.to_string(), "begin_list timed out after 1000ms");
    }
}
