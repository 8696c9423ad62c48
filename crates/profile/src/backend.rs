//! Store-neutral contracts shared by the document adapter and the relational store.

use async_trait::async_trait;
use dim_sync_types::{
    AccountId, MigrationState, ProfileRequest, ProfileResponse, ProfileUpdate, StoreKind,
    UpdateContext, UpdateResult, UserSnapshot,
};

use crate::error::Result;

/// Counts reported by [`ProfileBackend::import_user`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    /// Records wiped from the destination before writing.
    pub deleted: usize,
    /// Records written.
    pub written: usize,
    /// Records folded into another record with the same identity.
    pub deduplicated: usize,
    /// Records that could not be converted and were skipped.
    pub dropped: usize,
}

/// Everything the request layer and the bulk transfer need from a store
/// holding profile data.
///
/// Both stores implement this, so routing and migration are written once
/// against the trait and never against a concrete store.
#[async_trait]
pub trait ProfileBackend: Send + Sync {
    /// Which store this is.
    fn kind(&self) -> StoreKind;

    /// Reads the requested components of one profile.
    async fn read_profile(&self, request: &ProfileRequest) -> Result<ProfileResponse>;

    /// Applies a batch of update actions in order.
    ///
    /// Returns one result per action. An action rejected for its content
    /// yields [`UpdateResult::Failed`] without stopping the batch; a
    /// retryable store failure fails the whole call.
    async fn apply_updates(
        &self,
        context: &UpdateContext,
        updates: &[ProfileUpdate],
    ) -> Result<Vec<UpdateResult>>;

    /// Reads everything the account owns.
    async fn export_user(&self, account: AccountId) -> Result<UserSnapshot>;

    /// Replaces everything the account owns with `snapshot`.
    ///
    /// The account's existing data is wiped first, so repeating an import
    /// leaves the same records as running it once.
    async fn import_user(&self, account: AccountId, snapshot: &UserSnapshot)
    -> Result<ImportStats>;

    /// Deletes everything the account owns. Returns the number of records removed.
    async fn delete_all_data(&self, account: AccountId) -> Result<usize>;

    /// Number of records the account owns, counted the way
    /// [`UserSnapshot::record_count`] counts them.
    async fn count_records(&self, account: AccountId) -> Result<usize>;
}

/// Outcome of a compare-and-swap on a migration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The state was written; carries the stored record with its new revision.
    Swapped(MigrationState),
    /// Another writer got there first; carries the current record.
    Stale(MigrationState),
}

/// Durable per-account migration state with compare-and-swap writes.
#[async_trait]
pub trait MigrationStateStore: Send + Sync {
    /// Reads the stored state, `None` if the account was never transitioned.
    async fn load_state(&self, account: AccountId) -> Result<Option<MigrationState>>;

    /// Writes `next` if the stored revision still equals `expected_revision`
    /// (zero meaning "no record"). The store assigns the new revision.
    async fn swap_state(&self, expected_revision: u64, next: MigrationState)
    -> Result<SwapOutcome>;

    /// Removes the state record. Used by data wipes only.
    async fn delete_state(&self, account: AccountId) -> Result<()>;
}
