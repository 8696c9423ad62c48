//! Migration metrics via the `metrics` crate facade.
//!
//! Names follow `dimsync_migration_{name}_{unit}`. Every migration metric
//! carries a `direction` label (`to_document` or `to_legacy`).

use std::time::Duration;

use dim_sync_types::{MigrationStatus, StoreKind};
use metrics::{counter, histogram};

const STARTED_TOTAL: &str = "dimsync_migration_started_total";
const FINISHED_TOTAL: &str = "dimsync_migration_finished_total";
const ABORTED_TOTAL: &str = "dimsync_migration_aborted_total";
const ABORT_FAILED_TOTAL: &str = "dimsync_migration_abort_failed_total";
const DURATION_SECONDS: &str = "dimsync_migration_duration_seconds";
const TRANSFER_DURATION_SECONDS: &str = "dimsync_migration_transfer_duration_seconds";
const TRANSFER_RECORDS: &str = "dimsync_migration_transfer_records";
const TRANSFER_DROPPED_TOTAL: &str = "dimsync_migration_transfer_dropped_total";
const IN_PROGRESS_REJECTIONS_TOTAL: &str = "dimsync_migration_in_progress_rejections_total";

fn direction(status: MigrationStatus) -> &'static str {
    match status.direction() {
        Some((_, StoreKind::Document)) => "to_document",
        Some((_, StoreKind::Legacy)) => "to_legacy",
        None => "none",
    }
}

/// Records a migration that won the start transition.
#[inline]
pub fn record_started(status: MigrationStatus) {
    counter!(STARTED_TOTAL, "direction" => direction(status)).increment(1);
}

/// Records a migration that reached its destination owner.
#[inline]
pub fn record_finished(status: MigrationStatus, elapsed: Duration) {
    let direction = direction(status);
    counter!(FINISHED_TOTAL, "direction" => direction).increment(1);
    histogram!(DURATION_SECONDS, "direction" => direction).record(elapsed.as_secs_f64());
}

/// Records a migration rolled back to its source owner.
#[inline]
pub fn record_aborted(status: MigrationStatus) {
    counter!(ABORTED_TOTAL, "direction" => direction(status)).increment(1);
}

/// Records an abort that could not be written; the account stays in `status`.
#[inline]
pub fn record_abort_failed(status: MigrationStatus) {
    counter!(ABORT_FAILED_TOTAL, "direction" => direction(status)).increment(1);
}

/// Records one completed bulk transfer.
#[inline]
pub fn record_transfer(status: MigrationStatus, elapsed: Duration, written: usize, dropped: usize) {
    let direction = direction(status);
    histogram!(TRANSFER_DURATION_SECONDS, "direction" => direction).record(elapsed.as_secs_f64());
    histogram!(TRANSFER_RECORDS, "direction" => direction).record(written as f64);
    if dropped > 0 {
        counter!(TRANSFER_DROPPED_TOTAL, "direction" => direction).increment(dropped as u64);
    }
}

/// Records a request turned away because its account was migrating.
#[inline]
pub fn record_in_progress_rejection(operation: &'static str) {
    counter!(IN_PROGRESS_REJECTIONS_TOTAL, "operation" => operation).increment(1);
}
