//! Shared test utilities for DIM sync crates.
//!
//! - [`assert_eventually`] / [`assert_eventually_async`] - poll a condition until it holds or times out
//! - [`init_tracing`] - install a test log subscriber once per process
//! - [`test_store_config`] and friends - small, fast configurations
//! - [`strategies`] - proptest generators for domain records and whole accounts
//! - [`fixtures`] - a hand-written sample account

#![deny(unsafe_code)]
// Test utilities are allowed to use unwrap for simplicity
#![cfg_attr(test, allow(clippy::disallowed_methods))]

mod assertions;
pub use assertions::{assert_eventually, assert_eventually_async};

mod config;
pub use config::{
    test_migration_config, test_retry_config, test_store_config, test_transfer_config,
};

pub mod fixtures;
pub mod strategies;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use dim_sync_types::normalize_hash;

    use super::*;

    // ============================================
    // assert_eventually tests
    // ============================================

    #[tokio::test]
    async fn test_assert_eventually_immediate_success() {
        let result = assert_eventually(Duration::from_millis(100), || true).await;
        assert!(result, "immediately true condition should succeed");
    }

    #[tokio::test]
    async fn test_assert_eventually_delayed_success() {
        let counter = AtomicUsize::new(0);
        let result = assert_eventually(Duration::from_millis(500), || {
            counter.fetch_add(1, Ordering::SeqCst) >= 3
        })
        .await;
        assert!(result, "condition should become true after a few polls");
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_eventually_timeout() {
        let result = assert_eventually(Duration::from_millis(50), || false).await;
        assert!(!result, "never-true condition should time out");
    }

    #[tokio::test]
    async fn test_assert_eventually_async_awaits_condition() {
        let counter = &AtomicUsize::new(0);
        let result = assert_eventually_async(Duration::from_millis(500), move || async move {
            tokio::task::yield_now().await;
            counter.fetch_add(1, Ordering::SeqCst) >= 2
        })
        .await;
        assert!(result);
    }

    // ============================================
    // Config and fixture tests
    // ============================================

    #[test]
    fn test_configs_are_valid() {
        test_store_config().validate().expect("store config");
        test_retry_config().validate().expect("retry config");
        test_transfer_config().validate().expect("transfer config");
        test_migration_config().validate().expect("migration config");
    }

    #[test]
    fn test_sample_loadout_parses() {
        let loadout = fixtures::sample_loadout();
        assert_eq!(loadout.name, "Raid Day");
        assert_eq!(loadout.equipped.len(), 2);
        assert!(loadout.extra.contains_key("clientRevision"));
    }

    #[test]
    fn test_sample_snapshot_has_collisions() {
        let snapshot = fixtures::sample_snapshot();
        let spelled = snapshot.searches.iter().filter(|s| s.search.query.contains("outlaw")).count();
        assert_eq!(spelled, 2);
        assert!(snapshot.tags.iter().any(|t| t.annotation.is_empty()));
    }

    #[test]
    fn test_spell_hash() {
        assert_eq!(strategies::spell_hash(u32::MAX, true), -1);
        assert_eq!(strategies::spell_hash(u32::MAX, false), i64::from(u32::MAX));
        assert_eq!(strategies::spell_hash(5, true), 5);
        assert_eq!(normalize_hash(strategies::spell_hash(3_000_000_000, true)), Ok(3_000_000_000));
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
