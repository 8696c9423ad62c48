//! Error types for migration and owner routing.

use dim_sync_profile::ProfileError;
use dim_sync_types::{AccountId, ErrorCode, MigrationStatus, StoreKind};
use snafu::Snafu;

/// Result type alias for migration operations.
pub type Result<T, E = MigrationError> = std::result::Result<T, E>;

/// Errors from the migration coordinator, the bulk transfer and the router.
///
/// # Recovery Guide
///
/// | Variant               | Retryable  | Recovery Action                                   |
/// | --------------------- | ---------- | ------------------------------------------------- |
/// | `PreconditionFailed`  | No         | Re-read the state; another caller moved it        |
/// | `InvalidTransition`   | No         | Caller bug; the operation never applies here      |
/// | `MigrationInProgress` | Yes        | Retry shortly                                     |
/// | `OwnerChanged`        | Yes        | Retry; the write goes to the new owner            |
/// | `TransferFailed`      | Yes        | Migration was aborted; run it again               |
/// | `CountMismatch`       | Yes        | Run the migration again                           |
/// | `State`               | Per source | See [`ProfileError`]                              |
/// | `Backend`             | Per source | See [`ProfileError`]                              |
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MigrationError {
    /// A guarded transition found the account in another state.
    #[snafu(display("{account} expected {expected}, found {actual}"))]
    PreconditionFailed {
        /// The account.
        account: AccountId,
        /// State the caller expected.
        expected: MigrationStatus,
        /// State actually stored.
        actual: MigrationStatus,
    },

    /// The operation has no target state from `from`.
    #[snafu(display("cannot {operation} {account} from {from}"))]
    InvalidTransition {
        /// The account.
        account: AccountId,
        /// Coordinator operation.
        operation: &'static str,
        /// State the operation was asked to leave.
        from: MigrationStatus,
    },

    /// The account is being migrated; its data cannot be served right now.
    #[snafu(display("{account} is {status}, retry shortly"))]
    MigrationInProgress {
        /// The account.
        account: AccountId,
        /// Current migrating state.
        status: MigrationStatus,
    },

    /// A write committed while the account's ownership was changing, so it
    /// may have missed the copy. Repeating it reaches the current owner.
    #[snafu(display("{account} changed owner during a write to the {written} store, now {status}; retry"))]
    OwnerChanged {
        /// The account.
        account: AccountId,
        /// Store the write landed in.
        written: StoreKind,
        /// State found after the write.
        status: MigrationStatus,
    },

    /// Copying the account failed and the migration was aborted.
    #[snafu(display("transfer of {account} failed: {message}"))]
    TransferFailed {
        /// The account.
        account: AccountId,
        /// Error that caused the abort.
        message: String,
    },

    /// The destination holds a different number of records than were written.
    #[snafu(display(
        "{destination} store holds {actual} records for {account} after writing {expected}"
    ))]
    CountMismatch {
        /// The account.
        account: AccountId,
        /// Store that was imported into.
        destination: StoreKind,
        /// Records the import reported as written.
        expected: usize,
        /// Records counted afterwards.
        actual: usize,
    },

    /// Reading or writing migration state failed.
    #[snafu(display("{operation} state of {account}: {source}"))]
    State {
        /// The account.
        account: AccountId,
        /// Coordinator operation.
        operation: &'static str,
        /// The underlying error.
        source: ProfileError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },

    /// A profile store call failed.
    #[snafu(display("{operation} on {store} store for {account}: {source}"))]
    Backend {
        /// The account.
        account: AccountId,
        /// Store the call went to.
        store: StoreKind,
        /// Backend operation.
        operation: &'static str,
        /// The underlying error.
        source: ProfileError,
        /// Source location.
        #[snafu(implicit)]
        location: snafu::Location,
    },
}

impl MigrationError {
    /// Machine-readable code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            MigrationError::PreconditionFailed { .. } | MigrationError::InvalidTransition { .. } => {
                ErrorCode::PreconditionFailed
            },
            MigrationError::MigrationInProgress { .. } | MigrationError::OwnerChanged { .. } => {
                ErrorCode::MigrationInProgress
            },
            MigrationError::TransferFailed { .. } | MigrationError::CountMismatch { .. } => {
                ErrorCode::TransferFailed
            },
            MigrationError::State { source, .. } | MigrationError::Backend { source, .. } => {
                source.code()
            },
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
    fn test_precondition_failed_is_not_retryable() {
        let err = MigrationError::PreconditionFailed {
            account: AccountId::new(4321),
            expected: MigrationStatus::LegacyOwned,
            actual: MigrationStatus::MigratingToNew,
        };
        assert_eq!(err.code(), ErrorCode::PreconditionFailed);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "account:4321 expected legacy_owned, found migrating_to_new");
    }

    #[test]
    fn test_in_progress_asks_for_retry() {
        let err = MigrationError::MigrationInProgress {
            account: AccountId::new(1),
            status: MigrationStatus::MigratingToNew,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().ends_with("retry shortly"));
    }

    #[test]
    fn test_owner_change_is_retryable() {
        let err = MigrationError::OwnerChanged {
            account: AccountId::new(1),
            written: StoreKind::Legacy,
            status: MigrationStatus::NewOwned,
        };
        assert_eq!(err.code(), ErrorCode::MigrationInProgress);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_wrapped_errors_keep_source_code() {
        let err = MigrationError::Backend {
            account: AccountId::new(1),
            store: StoreKind::Legacy,
            operation: "export_user",
            source: ProfileError::LegacyUnavailable {
                operation: "export_user".into(),
                message: "connection reset".into(),
            },
            location: snafu::location!(),
        };
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        assert!(err.is_retryable());
    }
}
