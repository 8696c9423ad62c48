//! Document store metrics via the `metrics` crate facade.
//!
//! Names follow `dimsync_store_{name}_{unit}`. Counters carry a `_total`
//! suffix.

use metrics::{counter, histogram};

const BATCHES_TOTAL: &str = "dimsync_store_batches_total";
const BATCH_SIZE: &str = "dimsync_store_batch_size";
const TIMEOUTS_TOTAL: &str = "dimsync_store_timeouts_total";
const TXN_CONFLICTS_TOTAL: &str = "dimsync_store_transaction_conflicts_total";
const TXN_EXHAUSTED_TOTAL: &str = "dimsync_store_transaction_exhausted_total";
const SYNC_RESETS_TOTAL: &str = "dimsync_store_sync_resets_total";

/// Records one batched call to the store.
#[inline]
pub fn record_batch(operation: &'static str, size: usize) {
    counter!(BATCHES_TOTAL, "operation" => operation).increment(1);
    histogram!(BATCH_SIZE, "operation" => operation).record(size as f64);
}

/// Records a read that exceeded its timeout.
#[inline]
pub fn record_timeout(operation: &str) {
    counter!(TIMEOUTS_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Records one optimistic-transaction conflict that will be retried or surfaced.
#[inline]
pub fn record_transaction_conflict() {
    counter!(TXN_CONFLICTS_TOTAL).increment(1);
}

/// Records a transaction whose conflict retries ran out.
#[inline]
pub fn record_transaction_exhausted() {
    counter!(TXN_EXHAUSTED_TOTAL).increment(1);
}

/// Records a sync read that told the caller to list again.
#[inline]
pub fn record_sync_reset() {
    counter!(SYNC_RESETS_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_dont_panic() {
        // No recorder installed.
        record_batch("put_batch", 50);
        record_timeout("get");
        record_transaction_conflict();
        record_transaction_exhausted();
        record_sync_reset();
    }
}
