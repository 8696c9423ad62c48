//! Per-account migration state machine.
//!
//! The coordinator owns the only cross-process critical section in the
//! system: the [`MigrationState`] record. Every transition is a
//! compare-and-swap against the revision read just before it, so two callers
//! racing to start the same migration cannot both win. The loser sees
//! [`MigrationError::PreconditionFailed`].
//!
//! ## Transitions
//!
//! ```text
//!                start                 finish
//!  LegacyOwned ────────► MigratingToNew ────────► NewOwned
//!       ▲                      │                     │
//!       └──────── abort ───────┘                     │ start
//!       │                                            ▼
//!       └────────────── finish ──────────── MigratingToLegacy
//!                                      (abort returns to NewOwned)
//! ```
//!
//! Only [`MigrationCoordinator::run_migration`] should be used by
//! application code. The primitives are public for it, for operators
//! resuming a stuck account, and for tests.

use std::{future::Future, sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use dim_sync_profile::{MigrationStateStore, SwapOutcome};
use dim_sync_store::{ConflictRetry, with_retry};
use dim_sync_types::{
    AccountId, MigrationState, MigrationStatus,
    config::{ConflictRetryConfig, MigrationConfig},
};
use snafu::{ResultExt, ensure};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    error::{
        InvalidTransitionSnafu, MigrationError, MigrationInProgressSnafu, PreconditionFailedSnafu,
        Result, StateSnafu, TransferFailedSnafu,
    },
    metrics,
};

/// Drives accounts between the legacy and document stores.
#[derive(Clone)]
pub struct MigrationCoordinator {
    states: Arc<dyn MigrationStateStore>,
    stuck_after: Duration,
    abort_retry: ConflictRetry,
}

impl MigrationCoordinator {
    /// Creates a coordinator over `states`. Aborts retry transient state
    /// store failures with the `retry` policy.
    pub fn new(
        states: Arc<dyn MigrationStateStore>,
        config: &MigrationConfig,
        retry: &ConflictRetryConfig,
    ) -> Self {
        Self {
            states,
            stuck_after: config.stuck_after,
            abort_retry: ConflictRetry::from_config(retry),
        }
    }

    /// Replaces the abort retry policy.
    #[must_use]
    pub fn with_abort_retry(mut self, retry: ConflictRetry) -> Self {
        self.abort_retry = retry;
        self
    }

    /// Current state, or the initial `LegacyOwned` state if none was stored.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::State`] if the state store fails.
    pub async fn get_state(&self, account: AccountId) -> Result<MigrationState> {
        let stored =
            self.states.load_state(account).await.context(StateSnafu { account, operation: "load" })?;
        Ok(stored.unwrap_or_else(|| MigrationState::initial(account)))
    }

    /// Whether a migrating account has sat still long enough to be resumed.
    pub fn is_stuck(&self, state: &MigrationState) -> bool {
        if !state.status.is_migrating() {
            return false;
        }
        let Some(changed_at) = state.last_state_change_at else {
            return true;
        };
        let limit = TimeDelta::from_std(self.stuck_after).unwrap_or(TimeDelta::MAX);
        Utc::now().signed_duration_since(changed_at) >= limit
    }

    /// Begins a migration out of `expected`, counting one more attempt.
    ///
    /// From an owned state this moves to the matching migrating state. From
    /// a migrating state it restarts the same migration in place, which is
    /// how a stuck account is resumed.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::PreconditionFailed`] if the stored state is
    /// not `expected`, including when another caller started first.
    pub async fn start_migration(
        &self,
        account: AccountId,
        expected: MigrationStatus,
    ) -> Result<MigrationState> {
        let target = expected.migrating().unwrap_or(expected);
        let state = self
            .transition(account, expected, "start", Some(target), |next| {
                next.attempt_count = next.attempt_count.saturating_add(1);
            })
            .await?;
        metrics::record_started(state.status);
        info!(
            account = %account,
            status = %state.status,
            attempt = state.attempt_count,
            "migration started"
        );
        Ok(state)
    }

    /// Completes a migration, handing the account to its destination store.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidTransition`] unless `expected` is a
    /// migrating state, or [`MigrationError::PreconditionFailed`] if the
    /// stored state is not `expected`.
    pub async fn finish_migration(
        &self,
        account: AccountId,
        expected: MigrationStatus,
    ) -> Result<MigrationState> {
        let state = self.transition(account, expected, "finish", expected.finished(), |_| {}).await?;
        info!(account = %account, status = %state.status, attempt = state.attempt_count, "migration finished");
        Ok(state)
    }

    /// Rolls a migration back to the store that owned the account before it,
    /// recording `error` as the last failure.
    ///
    /// Transient state store failures are retried; this is the recovery path
    /// and has to land.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidTransition`] unless `expected` is a
    /// migrating state, [`MigrationError::PreconditionFailed`] if the stored
    /// state is not `expected`, or the last state store error once retries
    /// run out.
    pub async fn abort_migration(
        &self,
        account: AccountId,
        expected: MigrationStatus,
        error: &str,
    ) -> Result<MigrationState> {
        let result = with_retry(&self.abort_retry, "abort_migration", MigrationError::is_retryable, || {
            self.transition(account, expected, "abort", expected.aborted(), |next| {
                next.last_error = Some(error.to_string());
            })
        })
        .await;

        match result {
            Ok(state) => {
                metrics::record_aborted(expected);
                warn!(account = %account, status = %state.status, error, "migration aborted");
                Ok(state)
            },
            Err(err) => {
                metrics::record_abort_failed(expected);
                error!(account = %account, status = %expected, error = %err, "could not abort migration");
                Err(err)
            },
        }
    }

    /// Runs one migration end to end: start, `transfer`, finish.
    ///
    /// See [`run_migration_with`](Self::run_migration_with).
    ///
    /// # Errors
    ///
    /// As [`run_migration_with`](Self::run_migration_with).
    pub async fn run_migration<T, TFut>(
        &self,
        account: AccountId,
        transfer: T,
    ) -> Result<MigrationState>
    where
        T: FnOnce(MigrationState) -> TFut,
        TFut: Future<Output = Result<()>>,
    {
        self.run_migration_with(account, transfer, |_| async { Ok(()) }).await
    }

    /// Runs one migration end to end: start, `transfer`, `before_finish`,
    /// finish.
    ///
    /// The direction follows the stored state: a `LegacyOwned` account moves
    /// to the document store and a `NewOwned` one moves back. An account
    /// already migrating is resumed only once [`is_stuck`](Self::is_stuck).
    /// Any failure after the start aborts the migration before the error is
    /// returned.
    ///
    /// # Errors
    ///
    /// - [`MigrationError::MigrationInProgress`] if another migration of the
    ///   account is live.
    /// - [`MigrationError::PreconditionFailed`] if another caller won the start.
    /// - [`MigrationError::TransferFailed`] if the migration was aborted.
    /// - The abort error itself if the rollback could not be written.
    pub async fn run_migration_with<T, TFut, H, HFut>(
        &self,
        account: AccountId,
        transfer: T,
        before_finish: H,
    ) -> Result<MigrationState>
    where
        T: FnOnce(MigrationState) -> TFut,
        TFut: Future<Output = Result<()>>,
        H: FnOnce(MigrationState) -> HFut,
        HFut: Future<Output = Result<()>>,
    {
        let current = self.get_state(account).await?;
        if current.status.is_migrating() {
            ensure!(
                self.is_stuck(&current),
                MigrationInProgressSnafu { account, status: current.status }
            );
            warn!(
                account = %account,
                status = %current.status,
                attempt = current.attempt_count,
                "resuming stuck migration"
            );
        }

        let started = self.start_migration(account, current.status).await?;
        let status = started.status;
        let begun = Instant::now();

        let outcome = async {
            transfer(started.clone()).await?;
            before_finish(started).await?;
            self.finish_migration(account, status).await
        }
        .await;

        match outcome {
            Ok(finished) => {
                metrics::record_finished(status, begun.elapsed());
                Ok(finished)
            },
            Err(err) => {
                let message = err.to_string();
                warn!(account = %account, status = %status, error = %message, "migration failed");
                self.abort_migration(account, status, &message).await?;
                TransferFailedSnafu { account, message }.fail()
            },
        }
    }

    /// Forgets the account's migration record. Used by data wipes only.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::State`] if the state store fails.
    pub async fn clear_state(&self, account: AccountId) -> Result<()> {
        self.states.delete_state(account).await.context(StateSnafu { account, operation: "clear" })
    }

    async fn transition(
        &self,
        account: AccountId,
        expected: MigrationStatus,
        operation: &'static str,
        target: Option<MigrationStatus>,
        apply: impl FnOnce(&mut MigrationState),
    ) -> Result<MigrationState> {
        let Some(target) = target else {
            return InvalidTransitionSnafu { account, operation, from: expected }.fail();
        };
        let current = self.get_state(account).await?;
        ensure!(
            current.status == expected,
            PreconditionFailedSnafu { account, expected, actual: current.status }
        );

        let mut next = current.clone();
        next.status = target;
        next.last_state_change_at = Some(Utc::now());
        apply(&mut next);

        let outcome = self
            .states
            .swap_state(current.revision, next)
            .await
            .context(StateSnafu { account, operation })?;
        match outcome {
            SwapOutcome::Swapped(state) => Ok(state),
            SwapOutcome::Stale(actual) => {
                PreconditionFailedSnafu { account, expected, actual: actual.status }.fail()
            },
        }
    }
}
