//! Test configuration helpers.
//!
//! Small batches and near-zero pauses keep tests fast while still forcing
//! bulk operations across several batches.

use std::time::Duration;

use dim_sync_types::config::{
    ConflictRetryConfig, MigrationConfig, RolloutConfig, StoreConfig, TransferConfig,
};

/// Store limits for tests.
///
/// - `max_batch_size`: 3, so any realistic account spans several batches
/// - `read_timeout`: 2s
/// - `stale_read_timeout`: 500ms
/// - `change_log_capacity`: 1000
#[must_use]
pub fn test_store_config() -> StoreConfig {
    StoreConfig {
        max_batch_size: 3,
        read_timeout: Duration::from_secs(2),
        stale_read_timeout: Duration::from_millis(500),
        change_log_capacity: 1000,
    }
}

/// Conflict retry policy with millisecond backoff.
#[must_use]
pub fn test_retry_config() -> ConflictRetryConfig {
    ConflictRetryConfig {
        max_attempts: 3,
        min_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// Bulk transfer with no pause between batches and count verification on.
#[must_use]
pub fn test_transfer_config() -> TransferConfig {
    TransferConfig { batch_delay: Duration::ZERO, verify_counts: true }
}

/// Migration policy that migrates every account on first write.
#[must_use]
pub fn test_migration_config() -> MigrationConfig {
    MigrationConfig {
        stuck_after: Duration::from_secs(60),
        rollout: RolloutConfig {
            enabled: true,
            percentage: 100,
            forced_accounts: Vec::new(),
            excluded_accounts: Vec::new(),
        },
    }
}
