//! Owner routing for profile requests.
//!
//! Every account is served by exactly one store at a time, as recorded by the
//! [`MigrationCoordinator`]. The router reads that record on each request,
//! sends the call to the owning backend, and turns requests away with a
//! retryable error while the account is between owners. The first write for
//! an account the rollout policy selects migrates it to the document store;
//! if that migration aborts, the write is served by the legacy store.

use std::sync::Arc;

use dim_sync_profile::{ImportStats, ProfileBackend};
use dim_sync_types::{
    AccountId, MigrationState, MigrationStatus, ProfileRequest, ProfileResponse, ProfileUpdate,
    StoreKind, UpdateContext, UpdateResult, UserSnapshot,
    config::{MigrationConfig, RolloutConfig},
};
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    coordinator::MigrationCoordinator,
    error::{BackendSnafu, MigrationInProgressSnafu, OwnerChangedSnafu, Result},
    metrics,
    transfer::BulkTransfer,
};

/// Ownership summary handed to request handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerState {
    /// Store serving the account, `None` while it is migrating.
    pub store: Option<StoreKind>,
    /// Full migration status.
    pub status: MigrationStatus,
    /// Migrations started for the account.
    pub attempt_count: u32,
    /// Last migration failure.
    pub last_error: Option<String>,
}

impl From<MigrationState> for OwnerState {
    fn from(state: MigrationState) -> Self {
        Self {
            store: state.status.owner(),
            status: state.status,
            attempt_count: state.attempt_count,
            last_error: state.last_error,
        }
    }
}

/// Records removed by [`ProfileRouter::delete_all_data`], per store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletedRecords {
    /// Rows removed from the legacy store.
    pub legacy: usize,
    /// Records removed from the document store.
    pub document: usize,
}

/// Routes profile calls to whichever store owns the account.
#[derive(Clone)]
pub struct ProfileRouter {
    coordinator: MigrationCoordinator,
    transfer: BulkTransfer,
    rollout: RolloutConfig,
}

impl ProfileRouter {
    /// Creates a router. `transfer` supplies both backends.
    pub fn new(
        coordinator: MigrationCoordinator,
        transfer: BulkTransfer,
        config: &MigrationConfig,
    ) -> Self {
        Self { coordinator, transfer, rollout: config.rollout.clone() }
    }

    /// The migration coordinator.
    pub fn coordinator(&self) -> &MigrationCoordinator {
        &self.coordinator
    }

    /// Which store serves the account, with its migration history.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::State`](crate::MigrationError::State) if the
    /// state store fails.
    pub async fn get_owner_state(&self, account: AccountId) -> Result<OwnerState> {
        Ok(self.coordinator.get_state(account).await?.into())
    }

    /// Reads a profile from the owning store.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MigrationInProgress`](crate::MigrationError::MigrationInProgress)
    /// while the account is migrating, or the owning store's error.
    pub async fn read_profile(&self, request: &ProfileRequest) -> Result<ProfileResponse> {
        let account = request.account;
        let (_, owner) = self.owner(account, "read_profile").await?;
        self.backend(owner)
            .read_profile(request)
            .await
            .context(BackendSnafu { account, store: owner, operation: "read_profile" })
    }

    /// Applies updates in the owning store, migrating the account first if
    /// the rollout policy selects it.
    ///
    /// The migration state is read again once the write has committed. If any
    /// transition happened in between, a concurrent migration may have copied
    /// the account before the write landed, so the call fails as retryable and
    /// the retry reaches whichever store owns the account by then.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MigrationInProgress`](crate::MigrationError::MigrationInProgress)
    /// while the account is migrating,
    /// [`MigrationError::OwnerChanged`](crate::MigrationError::OwnerChanged) if
    /// ownership moved during the write, or the owning store's error.
    pub async fn apply_updates(
        &self,
        context: &UpdateContext,
        updates: &[ProfileUpdate],
    ) -> Result<Vec<UpdateResult>> {
        let account = context.account;
        let (mut before, mut owner) = self.owner(account, "apply_updates").await?;
        if owner == StoreKind::Legacy && self.rollout.should_migrate(account) {
            (before, owner) = self.migrate_on_write(account).await?;
        }
        let results = self
            .backend(owner)
            .apply_updates(context, updates)
            .await
            .context(BackendSnafu { account, store: owner, operation: "apply_updates" })?;
        self.confirm_owner(account, &before, owner, "apply_updates").await?;
        Ok(results)
    }

    /// Migrates the account to the other store now.
    ///
    /// # Errors
    ///
    /// As [`MigrationCoordinator::run_migration`].
    pub async fn migrate(&self, account: AccountId) -> Result<MigrationState> {
        self.coordinator
            .run_migration(account, |state| async move {
                self.transfer.run(account, state.status).await.map(|_| ())
            })
            .await
    }

    /// Exports the account from the owning store.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MigrationInProgress`](crate::MigrationError::MigrationInProgress)
    /// while the account is migrating, or the owning store's error.
    pub async fn export_user(&self, account: AccountId) -> Result<UserSnapshot> {
        let (_, owner) = self.owner(account, "export_user").await?;
        self.backend(owner)
            .export_user(account)
            .await
            .context(BackendSnafu { account, store: owner, operation: "export_user" })
    }

    /// Replaces the account's data in the owning store with `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MigrationInProgress`](crate::MigrationError::MigrationInProgress)
    /// while the account is migrating,
    /// [`MigrationError::OwnerChanged`](crate::MigrationError::OwnerChanged) if
    /// ownership moved during the import, or the owning store's error.
    pub async fn import_user(
        &self,
        account: AccountId,
        snapshot: &UserSnapshot,
    ) -> Result<ImportStats> {
        let (before, owner) = self.owner(account, "import_user").await?;
        let stats = self
            .backend(owner)
            .import_user(account, snapshot)
            .await
            .context(BackendSnafu { account, store: owner, operation: "import_user" })?;
        self.confirm_owner(account, &before, owner, "import_user").await?;
        Ok(stats)
    }

    /// Deletes the account from both stores and forgets its migration state.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MigrationInProgress`](crate::MigrationError::MigrationInProgress)
    /// while the account is migrating, or the first store error. A failure
    /// after the legacy wipe leaves the document copy in place; repeating
    /// the call finishes the job.
    pub async fn delete_all_data(&self, account: AccountId) -> Result<DeletedRecords> {
        self.owner(account, "delete_all_data").await?;
        let legacy = self
            .backend(StoreKind::Legacy)
            .delete_all_data(account)
            .await
            .context(BackendSnafu { account, store: StoreKind::Legacy, operation: "delete_all_data" })?;
        let document = self
            .backend(StoreKind::Document)
            .delete_all_data(account)
            .await
            .context(BackendSnafu {
                account,
                store: StoreKind::Document,
                operation: "delete_all_data",
            })?;
        self.coordinator.clear_state(account).await?;
        info!(account = %account, legacy, document, "deleted all account data");
        Ok(DeletedRecords { legacy, document })
    }

    fn backend(&self, kind: StoreKind) -> &Arc<dyn ProfileBackend> {
        self.transfer.backend(kind)
    }

    async fn owner(
        &self,
        account: AccountId,
        operation: &'static str,
    ) -> Result<(MigrationState, StoreKind)> {
        let state = self.coordinator.get_state(account).await?;
        match state.status.owner() {
            Some(owner) => Ok((state, owner)),
            None => {
                metrics::record_in_progress_rejection(operation);
                debug!(account = %account, status = %state.status, operation, "account is migrating");
                MigrationInProgressSnafu { account, status: state.status }.fail()
            },
        }
    }

    /// Fails a committed write if the state moved since `before` was read.
    async fn confirm_owner(
        &self,
        account: AccountId,
        before: &MigrationState,
        written: StoreKind,
        operation: &'static str,
    ) -> Result<()> {
        let after = self.coordinator.get_state(account).await?;
        if after.revision == before.revision {
            return Ok(());
        }
        metrics::record_in_progress_rejection(operation);
        warn!(
            account = %account,
            written = %written,
            status = %after.status,
            operation,
            "ownership changed during write"
        );
        OwnerChangedSnafu { account, written, status: after.status }.fail()
    }

    async fn migrate_on_write(&self, account: AccountId) -> Result<(MigrationState, StoreKind)> {
        match self.migrate(account).await {
            Ok(state) => {
                let owner = state.status.owner().unwrap_or(StoreKind::Document);
                Ok((state, owner))
            },
            Err(err) => {
                warn!(account = %account, error = %err, "migration on write failed");
                // Aborted migrations hand the account back; a live one by
                // another caller surfaces as in progress.
                self.owner(account, "apply_updates").await
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use dim_sync_profile::MemoryLegacyStore;
    use dim_sync_store::{InMemoryDocumentStore, StoreClient};
    use dim_sync_test_utils::{
        test_migration_config, test_retry_config, test_store_config, test_transfer_config,
    };
    use dim_sync_types::{DestinyVersion, ProfileId, Search, SearchType};

    use super::*;
    use crate::MigrationError;

    const ACCOUNT: AccountId = AccountId::new(4321);

    fn router(config: &MigrationConfig) -> (Arc<MemoryLegacyStore>, ProfileRouter) {
        let legacy = Arc::new(MemoryLegacyStore::new());
        let memory = Arc::new(InMemoryDocumentStore::new(&test_store_config()));
        let client = StoreClient::new(memory, test_store_config(), &test_retry_config());
        let document = Arc::new(dim_sync_profile::ProfileStore::new(client, &test_transfer_config()));
        let coordinator = MigrationCoordinator::new(legacy.clone(), config, &test_retry_config());
        let transfer = BulkTransfer::new(legacy.clone(), document, &test_transfer_config());
        (legacy, ProfileRouter::new(coordinator, transfer, config))
    }

    fn search(query: &str) -> ProfileUpdate {
        ProfileUpdate::Search { query: query.into(), search_type: SearchType::Item }
    }

    fn context() -> UpdateContext {
        UpdateContext {
            account: ACCOUNT,
            profile: Some(ProfileId::new(4611686018467284386)),
            destiny_version: DestinyVersion::D2,
        }
    }

    #[tokio::test]
    async fn test_unselected_account_stays_on_legacy() {
        let (legacy, router) = router(&MigrationConfig::default());
        router.apply_updates(&context(), &[search("is:handcannon")]).await.expect("write");
        assert_eq!(router.get_owner_state(ACCOUNT).await.expect("owner").store, Some(StoreKind::Legacy));
        assert_eq!(legacy.count_records(ACCOUNT).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_first_write_migrates_selected_account() {
        let (legacy, router) = router(&test_migration_config());
        legacy.apply_updates(&context(), &[search("is:handcannon")]).await.expect("seed");

        router.apply_updates(&context(), &[search("is:sword")]).await.expect("write");
        let owner = router.get_owner_state(ACCOUNT).await.expect("owner");
        assert_eq!(owner.store, Some(StoreKind::Document));
        assert_eq!(owner.attempt_count, 1);

        let request = ProfileRequest::full(ACCOUNT, ProfileId::new(4611686018467284386), DestinyVersion::D2);
        let searches: Vec<Search> = router.read_profile(&request).await.expect("read").searches;
        assert_eq!(searches.len(), 2);
        // The legacy copy is left as it was at migration time.
        assert_eq!(legacy.count_records(ACCOUNT).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_requests_wait_out_a_live_migration() {
        let (_, router) = router(&test_migration_config());
        router.coordinator().start_migration(ACCOUNT, MigrationStatus::LegacyOwned).await.expect("start");

        let request = ProfileRequest::full(ACCOUNT, ProfileId::new(1), DestinyVersion::D2);
        let err = router.read_profile(&request).await.unwrap_err();
        assert!(matches!(err, MigrationError::MigrationInProgress { .. }));
        let err = router.apply_updates(&context(), &[search("is:sword")]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(router.get_owner_state(ACCOUNT).await.expect("owner").store.is_none());
    }
}
