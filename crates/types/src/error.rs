//! Machine-readable error codes shared by every crate in the workspace.
//!
//! Each crate defines its own snafu error enum, and every variant of those
//! enums maps to one [`ErrorCode`] through a `code()` method. The request
//! layer uses the code to decide between "retry shortly" and "fix the
//! request" without matching on crate-specific variants.

use core::fmt;

/// Machine-readable error codes for programmatic error handling.
///
/// | Range     | Domain    | Examples                                         |
/// |-----------|-----------|--------------------------------------------------|
/// | 1000–1099 | Store     | Unavailable, concurrent modification, conflicts  |
/// | 2000–2099 | Migration | Precondition failed, transfer failed, in progress|
/// | 3000–3099 | Request   | Invalid argument, invalid sync token, not found  |
/// | 3100–3199 | Internal  | Serialization, invariant violation               |
///
/// # Wire Format
///
/// Codes travel as the decimal string of their numeric value. Use
/// [`ErrorCode::as_u16`] and [`ErrorCode::from_u16`] to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // --- Store errors (1000–1099) ---
    /// A store was unreachable or did not answer in time.
    StoreUnavailable = 1000,
    /// An optimistic transaction kept conflicting after every retry.
    ConcurrentModification = 1001,
    /// A must-not-exist write found an existing document.
    AlreadyExists = 1002,

    // --- Migration errors (2000–2099) ---
    /// A guarded state transition was attempted from the wrong state.
    PreconditionFailed = 2000,
    /// Exporting or importing an account failed; the migration was aborted.
    TransferFailed = 2001,
    /// The account is being migrated and cannot be read or written right now.
    MigrationInProgress = 2002,

    // --- Request errors (3000–3099) ---
    /// The request carried an invalid value.
    InvalidArgument = 3000,
    /// A sync token was forged, corrupted, or issued for another scope.
    InvalidSyncToken = 3001,
    /// The requested record does not exist.
    NotFound = 3002,

    // --- Internal errors (3100–3199) ---
    /// A stored record could not be encoded or decoded.
    Serialization = 3100,
    /// Unexpected state or invariant violation.
    Internal = 3101,
}

impl ErrorCode {
    /// Returns the numeric code value.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Converts a numeric code to an `ErrorCode`, returning `None` for unknown values.
    #[must_use]
    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::StoreUnavailable),
            1001 => Some(Self::ConcurrentModification),
            1002 => Some(Self::AlreadyExists),
            2000 => Some(Self::PreconditionFailed),
            2001 => Some(Self::TransferFailed),
            2002 => Some(Self::MigrationInProgress),
            3000 => Some(Self::InvalidArgument),
            3001 => Some(Self::InvalidSyncToken),
            3002 => Some(Self::NotFound),
            3100 => Some(Self::Serialization),
            3101 => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether the caller may retry the same request after a short delay.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable
                | Self::ConcurrentModification
                | Self::TransferFailed
                | Self::MigrationInProgress
        )
    }

    /// Suggested recovery action for this error code.
    ///
    /// Stable text, safe to show to clients or log for operators.
    #[must_use]
    pub const fn suggested_action(self) -> &'static str {
        match self {
            Self::StoreUnavailable => "Retry with backoff. The backing store is slow or unreachable.",
            Self::ConcurrentModification => {
                "Retry the request. Another writer updated the same document concurrently."
            },
            Self::AlreadyExists => {
                "Wipe the destination scope before importing, or update the existing record instead."
            },
            Self::PreconditionFailed => {
                "Re-read the migration state. Another caller already changed it."
            },
            Self::TransferFailed => {
                "The migration was aborted and the account still lives in its previous store. Retry later."
            },
            Self::MigrationInProgress => "Retry shortly. The account's data is being moved.",
            Self::InvalidArgument => "Fix the request parameters and resubmit.",
            Self::InvalidSyncToken => "Discard the token and request a full listing.",
            Self::NotFound => "Expected for first reads. Create the record first.",
            Self::Serialization => {
                "Codec bug or data corruption. Report as an issue with the affected key."
            },
            Self::Internal => {
                "Unexpected state or invariant violation. Collect context and report as an issue."
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 11] = [
        ErrorCode::StoreUnavailable,
        ErrorCode::ConcurrentModification,
        ErrorCode::AlreadyExists,
        ErrorCode::PreconditionFailed,
        ErrorCode::TransferFailed,
        ErrorCode::MigrationInProgress,
        ErrorCode::InvalidArgument,
        ErrorCode::InvalidSyncToken,
        ErrorCode::NotFound,
        ErrorCode::Serialization,
        ErrorCode::Internal,
    ];

    #[test]
    fn test_error_code_u16_is_reversible() {
        for code in ALL {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), Some(code));
        }
        assert_eq!(ErrorCode::from_u16(9999), None);
    }

    #[test]
    fn test_error_codes_are_unique() {
        let mut values: Vec<u16> = ALL.iter().map(|c| c.as_u16()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), ALL.len());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorCode::MigrationInProgress.is_retryable());
        assert!(ErrorCode::StoreUnavailable.is_retryable());
        assert!(!ErrorCode::PreconditionFailed.is_retryable());
        assert!(!ErrorCode::InvalidSyncToken.is_retryable());
    }

    #[test]
    fn test_suggested_actions_are_not_empty() {
        for code in ALL {
            assert!(!code.suggested_action().is_empty(), "{code:?}");
        }
    }

    #[test]
    fn test_display_is_numeric() {
        assert_eq!(ErrorCode::PreconditionFailed.to_string(), "2000");
    }
}
