//! Per-account migration state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, StoreKind};

/// Which store owns an account, or which way it is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MigrationStatus {
    /// The relational store owns the account.
    #[default]
    LegacyOwned,
    /// Data is being copied to the document store.
    MigratingToNew,
    /// The document store owns the account.
    NewOwned,
    /// Data is being copied back to the relational store.
    MigratingToLegacy,
}

impl MigrationStatus {
    /// Store that owns the account, or `None` while migrating.
    pub const fn owner(self) -> Option<StoreKind> {
        match self {
            MigrationStatus::LegacyOwned => Some(StoreKind::Legacy),
            MigrationStatus::NewOwned => Some(StoreKind::Document),
            MigrationStatus::MigratingToNew | MigrationStatus::MigratingToLegacy => None,
        }
    }

    /// Whether a migration is in flight.
    pub const fn is_migrating(self) -> bool {
        self.owner().is_none()
    }

    /// State a migration starting from this one moves into.
    pub const fn migrating(self) -> Option<MigrationStatus> {
        match self {
            MigrationStatus::LegacyOwned => Some(MigrationStatus::MigratingToNew),
            MigrationStatus::NewOwned => Some(MigrationStatus::MigratingToLegacy),
            MigrationStatus::MigratingToNew | MigrationStatus::MigratingToLegacy => None,
        }
    }

    /// State a successful migration from this one ends in.
    pub const fn finished(self) -> Option<MigrationStatus> {
        match self {
            MigrationStatus::MigratingToNew => Some(MigrationStatus::NewOwned),
            MigrationStatus::MigratingToLegacy => Some(MigrationStatus::LegacyOwned),
            MigrationStatus::LegacyOwned | MigrationStatus::NewOwned => None,
        }
    }

    /// State an aborted migration from this one returns to.
    pub const fn aborted(self) -> Option<MigrationStatus> {
        match self {
            MigrationStatus::MigratingToNew => Some(MigrationStatus::LegacyOwned),
            MigrationStatus::MigratingToLegacy => Some(MigrationStatus::NewOwned),
            MigrationStatus::LegacyOwned | MigrationStatus::NewOwned => None,
        }
    }

    /// Source and destination stores of a migration in this state.
    pub const fn direction(self) -> Option<(StoreKind, StoreKind)> {
        match self {
            MigrationStatus::MigratingToNew => Some((StoreKind::Legacy, StoreKind::Document)),
            MigrationStatus::MigratingToLegacy => Some((StoreKind::Document, StoreKind::Legacy)),
            MigrationStatus::LegacyOwned | MigrationStatus::NewOwned => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationStatus::LegacyOwned => "legacy_owned",
            MigrationStatus::MigratingToNew => "migrating_to_new",
            MigrationStatus::NewOwned => "new_owned",
            MigrationStatus::MigratingToLegacy => "migrating_to_legacy",
        };
        f.write_str(name)
    }
}

/// Migration record of one account.
///
/// `revision` is assigned by the state store and bumped on every write; a
/// transition is only applied if the revision it read is still current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    /// The account.
    pub account: AccountId,
    /// Current owner or migration direction.
    pub status: MigrationStatus,
    /// Migrations started, never reset.
    pub attempt_count: u32,
    /// Last failure message, kept until overwritten.
    pub last_error: Option<String>,
    /// Time of the last transition; `None` before the first one.
    pub last_state_change_at: Option<DateTime<Utc>>,
    /// Store-assigned write counter; zero if never written.
    pub revision: u64,
}

impl MigrationState {
    /// The implicit state of an account with no record.
    pub const fn initial(account: AccountId) -> Self {
        Self {
            account,
            status: MigrationStatus::LegacyOwned,
            attempt_count: 0,
            last_error: None,
            last_state_change_at: None,
            revision: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_lifecycle() {
        let start = MigrationStatus::default();
        assert_eq!(start.owner(), Some(StoreKind::Legacy));
        let migrating = start.migrating().expect("can start");
        assert!(migrating.is_migrating());
        assert_eq!(migrating.direction(), Some((StoreKind::Legacy, StoreKind::Document)));
        assert_eq!(migrating.aborted(), Some(MigrationStatus::LegacyOwned));
        assert_eq!(migrating.finished(), Some(MigrationStatus::NewOwned));
        assert!(migrating.migrating().is_none());
    }

    #[test]
    fn test_reverse_lifecycle() {
        let migrating = MigrationStatus::NewOwned.migrating().expect("can start");
        assert_eq!(migrating, MigrationStatus::MigratingToLegacy);
        assert_eq!(migrating.finished(), Some(MigrationStatus::LegacyOwned));
        assert_eq!(migrating.aborted(), Some(MigrationStatus::NewOwned));
        assert!(MigrationStatus::NewOwned.finished().is_none());
    }

    #[test]
    fn test_initial_state() {
        let state = MigrationState::initial(AccountId::new(4321));
        assert_eq!(state.status, MigrationStatus::LegacyOwned);
        assert_eq!(state.attempt_count, 0);
        assert!(state.last_error.is_none());
        assert_eq!(state.revision, 0);
    }
}
