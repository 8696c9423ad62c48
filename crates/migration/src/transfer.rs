//! Bulk transfer of one account between the two stores.
//!
//! A transfer exports everything from the source, imports it into the
//! destination (which wipes the destination's copy first), and optionally
//! recounts the destination. Nothing is resumable mid-way: a failed transfer
//! is simply run again from the start on the next attempt.

use std::{sync::Arc, time::Duration};

use dim_sync_profile::{ImportStats, ProfileBackend};
use dim_sync_types::{AccountId, MigrationStatus, StoreKind, config::TransferConfig};
use snafu::{OptionExt, ResultExt, ensure};
use tokio::time::Instant;
use tracing::info;

use crate::{
    error::{BackendSnafu, CountMismatchSnafu, InvalidTransitionSnafu, Result},
    metrics,
};

/// Outcome of one transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    /// Store the account was read from.
    pub source: StoreKind,
    /// Store the account was written to.
    pub destination: StoreKind,
    /// Records in the exported snapshot.
    pub exported: usize,
    /// What the import did.
    pub stats: ImportStats,
    /// Wall time of the whole transfer.
    pub elapsed: Duration,
}

/// Copies accounts between the legacy and document stores.
#[derive(Clone)]
pub struct BulkTransfer {
    legacy: Arc<dyn ProfileBackend>,
    document: Arc<dyn ProfileBackend>,
    verify_counts: bool,
}

impl BulkTransfer {
    /// Creates a transfer between the two stores.
    pub fn new(
        legacy: Arc<dyn ProfileBackend>,
        document: Arc<dyn ProfileBackend>,
        config: &TransferConfig,
    ) -> Self {
        Self { legacy, document, verify_counts: config.verify_counts }
    }

    /// The backend for `kind`.
    pub fn backend(&self, kind: StoreKind) -> &Arc<dyn ProfileBackend> {
        match kind {
            StoreKind::Legacy => &self.legacy,
            StoreKind::Document => &self.document,
        }
    }

    /// Copies `account` in the direction of the migrating state `status`.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::InvalidTransition`](crate::MigrationError::InvalidTransition)
    ///   if `status` is not a migrating state.
    /// - [`MigrationError::Backend`](crate::MigrationError::Backend) if either
    ///   store fails.
    /// - [`MigrationError::CountMismatch`](crate::MigrationError::CountMismatch)
    ///   if verification is on and the destination count is off.
    pub async fn run(&self, account: AccountId, status: MigrationStatus) -> Result<TransferReport> {
        let (source, destination) = status
            .direction()
            .context(InvalidTransitionSnafu { account, operation: "transfer", from: status })?;
        let begun = Instant::now();

        let snapshot = self
            .backend(source)
            .export_user(account)
            .await
            .context(BackendSnafu { account, store: source, operation: "export_user" })?;
        let stats = self
            .backend(destination)
            .import_user(account, &snapshot)
            .await
            .context(BackendSnafu { account, store: destination, operation: "import_user" })?;

        if self.verify_counts {
            let actual = self
                .backend(destination)
                .count_records(account)
                .await
                .context(BackendSnafu { account, store: destination, operation: "count_records" })?;
            ensure!(
                actual == stats.written,
                CountMismatchSnafu { account, destination, expected: stats.written, actual }
            );
        }

        let report = TransferReport {
            source,
            destination,
            exported: snapshot.record_count(),
            stats,
            elapsed: begun.elapsed(),
        };
        metrics::record_transfer(status, report.elapsed, stats.written, stats.dropped);
        info!(
            account = %account,
            source = %source,
            destination = %destination,
            exported = report.exported,
            written = stats.written,
            deduplicated = stats.deduplicated,
            dropped = stats.dropped,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "transferred account"
        );
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use dim_sync_profile::{MemoryLegacyStore, ProfileStore};
    use dim_sync_store::{InMemoryDocumentStore, StoreClient};
    use dim_sync_test_utils::{
        fixtures::{SAMPLE_ACCOUNT, sample_snapshot},
        test_retry_config, test_store_config, test_transfer_config,
    };

    use super::*;
    use crate::MigrationError;

    fn transfer() -> (Arc<MemoryLegacyStore>, Arc<InMemoryDocumentStore>, BulkTransfer) {
        let legacy = Arc::new(MemoryLegacyStore::new());
        let memory = Arc::new(InMemoryDocumentStore::new(&test_store_config()));
        let client = StoreClient::new(memory.clone(), test_store_config(), &test_retry_config());
        let document = Arc::new(ProfileStore::new(client, &test_transfer_config()));
        (legacy.clone(), memory, BulkTransfer::new(legacy, document, &test_transfer_config()))
    }

    #[tokio::test]
    async fn test_forward_transfer_copies_everything() {
        let (legacy, _, transfer) = transfer();
        legacy.import_user(SAMPLE_ACCOUNT, &sample_snapshot()).await.expect("seed");

        let report = transfer.run(SAMPLE_ACCOUNT, MigrationStatus::MigratingToNew).await.expect("transfer");
        assert_eq!((report.source, report.destination), (StoreKind::Legacy, StoreKind::Document));
        assert_eq!(report.stats.written, legacy.count_records(SAMPLE_ACCOUNT).await.expect("count"));

        let copied = transfer.backend(StoreKind::Document).export_user(SAMPLE_ACCOUNT).await.expect("export");
        let original = legacy.export_user(SAMPLE_ACCOUNT).await.expect("export");
        assert_eq!(copied.normalized(), original.normalized());
    }

    #[tokio::test]
    async fn test_transfer_needs_a_direction() {
        let (_, _, transfer) = transfer();
        let err = transfer.run(SAMPLE_ACCOUNT, MigrationStatus::NewOwned).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTransition { operation: "transfer", .. }));
    }

    #[tokio::test]
    async fn test_source_failure_names_the_store() {
        let (legacy, _, transfer) = transfer();
        legacy.faults().inject_unavailable(1);
        let err = transfer.run(SAMPLE_ACCOUNT, MigrationStatus::MigratingToNew).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Backend { store: StoreKind::Legacy, operation: "export_user", .. }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_destination_write_failure_surfaces() {
        let (legacy, memory, transfer) = transfer();
        legacy.import_user(SAMPLE_ACCOUNT, &sample_snapshot()).await.expect("seed");
        memory.faults().fail_writes_after(1);
        let err = transfer.run(SAMPLE_ACCOUNT, MigrationStatus::MigratingToNew).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Backend { store: StoreKind::Document, operation: "import_user", .. }
        ));
    }
}
