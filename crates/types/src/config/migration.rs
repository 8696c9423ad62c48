//! Migration, bulk transfer, rollout and cache configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, require_nonzero};
use crate::types::AccountId;

// =============================================================================
// Bulk Transfer
// =============================================================================

/// Pacing and verification of the bulk import step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TransferConfig {
    /// Pause between consecutive write batches, to stay under the destination
    /// store's write admission limits. Zero disables the pause.
    #[serde(default = "default_batch_delay")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub batch_delay: Duration,
    /// Recount the destination after import and fail the transfer on mismatch.
    #[serde(default = "default_verify_counts")]
    pub verify_counts: bool,
}

#[bon::bon]
impl TransferConfig {
    /// Creates a new transfer configuration.
    ///
    /// # Errors
    ///
    /// Never fails today; kept fallible so every section is built the same way.
    #[builder]
    pub fn new(
        #[builder(default = default_batch_delay())] batch_delay: Duration,
        #[builder(default = default_verify_counts())] verify_counts: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { batch_delay, verify_counts };
        config.validate()?;
        Ok(config)
    }
}

impl TransferConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Currently accepts every value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { batch_delay: default_batch_delay(), verify_counts: default_verify_counts() }
    }
}

fn default_batch_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_verify_counts() -> bool {
    true
}

// =============================================================================
// Rollout Policy
// =============================================================================

/// Selects which accounts are migrated to the document store.
///
/// Evaluation order: a disabled rollout selects nobody, an excluded account is
/// never selected, a forced account always is, and everyone else is selected
/// when `seahash(account) % 100 < percentage`. The hash makes the choice
/// stable across processes, so raising the percentage only ever adds accounts.
///
/// # Example
///
/// ```no_run
/// # use dim_sync_types::{config::RolloutConfig, AccountId};
/// let rollout = RolloutConfig::builder()
///     .enabled(true)
///     .percentage(0)
///     .forced_accounts(vec![4321])
///     .build()
///     .expect("valid rollout");
/// assert!(rollout.should_migrate(AccountId::new(4321)));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RolloutConfig {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Share of accounts to migrate, 0-100.
    #[serde(default)]
    pub percentage: u8,
    /// Accounts migrated regardless of `percentage`.
    #[serde(default)]
    pub forced_accounts: Vec<u64>,
    /// Accounts never migrated.
    #[serde(default)]
    pub excluded_accounts: Vec<u64>,
}

#[bon::bon]
impl RolloutConfig {
    /// Creates a new rollout policy with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `percentage` exceeds 100.
    #[builder]
    pub fn new(
        #[builder(default)] enabled: bool,
        #[builder(default)] percentage: u8,
        #[builder(default)] forced_accounts: Vec<u64>,
        #[builder(default)] excluded_accounts: Vec<u64>,
    ) -> Result<Self, ConfigError> {
        let config = Self { enabled, percentage, forced_accounts, excluded_accounts };
        config.validate()?;
        Ok(config)
    }
}

impl RolloutConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `percentage` exceeds 100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.percentage > 100 {
            return Err(ConfigError::Validation {
                message: format!("percentage must be 0-100, got {}", self.percentage),
            });
        }
        Ok(())
    }

    /// Whether the account should be moved to the document store.
    pub fn should_migrate(&self, account: AccountId) -> bool {
        if !self.enabled || self.excluded_accounts.contains(&account.value()) {
            return false;
        }
        if self.forced_accounts.contains(&account.value()) {
            return true;
        }
        rollout_bucket(account) < u64::from(self.percentage)
    }
}

/// Stable 0-99 bucket of an account.
pub fn rollout_bucket(account: AccountId) -> u64 {
    seahash::hash(&account.value().to_le_bytes()) % 100
}

// =============================================================================
// Migration Coordinator
// =============================================================================

/// Migration coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MigrationConfig {
    /// How long an account may sit in a migrating state before another
    /// caller is allowed to resume the migration.
    #[serde(default = "default_stuck_after")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub stuck_after: Duration,
    /// Which accounts are migrated lazily on write.
    #[serde(default)]
    pub rollout: RolloutConfig,
}

#[bon::bon]
impl MigrationConfig {
    /// Creates a new migration configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `stuck_after` is zero or the
    /// rollout policy is invalid.
    #[builder]
    pub fn new(
        #[builder(default = default_stuck_after())] stuck_after: Duration,
        #[builder(default)] rollout: RolloutConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { stuck_after, rollout };
        config.validate()?;
        Ok(config)
    }
}

impl MigrationConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("stuck_after", self.stuck_after)?;
        self.rollout.validate()
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self { stuck_after: default_stuck_after(), rollout: RolloutConfig::default() }
    }
}

fn default_stuck_after() -> Duration {
    Duration::from_secs(10 * 60)
}

// =============================================================================
// App Cache
// =============================================================================

/// App registration cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AppCacheConfig {
    /// Age after which the cached registrations are reloaded.
    #[serde(default = "default_refresh_interval")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub refresh_interval: Duration,
}

#[bon::bon]
impl AppCacheConfig {
    /// Creates a new cache configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `refresh_interval` is zero.
    #[builder]
    pub fn new(
        #[builder(default = default_refresh_interval())] refresh_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { refresh_interval };
        config.validate()?;
        Ok(config)
    }
}

impl AppCacheConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `refresh_interval` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("refresh_interval", self.refresh_interval)
    }
}

impl Default for AppCacheConfig {
    fn default() -> Self {
        Self { refresh_interval: default_refresh_interval() }
    }
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn rollout(enabled: bool, percentage: u8) -> RolloutConfig {
        RolloutConfig::builder()
            .enabled(enabled)
            .percentage(percentage)
            .build()
            .expect("valid rollout")
    }

    #[test]
    fn test_rollout_disabled_selects_nobody() {
        let policy = RolloutConfig::builder()
            .percentage(100)
            .forced_accounts(vec![7])
            .build()
            .expect("valid rollout");
        assert!(!policy.should_migrate(AccountId::new(7)));
        assert!(!policy.should_migrate(AccountId::new(8)));
    }

    #[test]
    fn test_rollout_full_percentage_selects_everyone() {
        let policy = rollout(true, 100);
        assert!((0..500).all(|a| policy.should_migrate(AccountId::new(a))));
    }

    #[test]
    fn test_rollout_zero_percentage_selects_only_forced() {
        let policy = RolloutConfig::builder()
            .enabled(true)
            .forced_accounts(vec![4321])
            .build()
            .expect("valid rollout");
        assert!(policy.should_migrate(AccountId::new(4321)));
        assert!((0..500).all(|a| !policy.should_migrate(AccountId::new(a))));
    }

    #[test]
    fn test_rollout_exclusion_beats_forcing() {
        let policy = RolloutConfig::builder()
            .enabled(true)
            .percentage(100)
            .forced_accounts(vec![1])
            .excluded_accounts(vec![1])
            .build()
            .expect("valid rollout");
        assert!(!policy.should_migrate(AccountId::new(1)));
    }

    #[test]
    fn test_rollout_is_monotonic_in_percentage() {
        let low = rollout(true, 20);
        let high = rollout(true, 60);
        for a in 0..1000 {
            let account = AccountId::new(a);
            if low.should_migrate(account) {
                assert!(high.should_migrate(account), "{account} dropped out");
            }
        }
    }

    #[test]
    fn test_rollout_percentage_is_roughly_proportional() {
        let policy = rollout(true, 50);
        let selected = (0..10_000).filter(|a| policy.should_migrate(AccountId::new(*a))).count();
        assert!((4000..6000).contains(&selected), "selected {selected}");
    }

    #[test]
    fn test_rollout_rejects_percentage_over_100() {
        let err = RolloutConfig::builder().percentage(101).build().unwrap_err();
        assert!(err.to_string().contains("percentage"));
    }

    #[test]
    fn test_migration_config_defaults() {
        let config = MigrationConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.stuck_after, Duration::from_secs(600));
        assert!(MigrationConfig::builder().stuck_after(Duration::ZERO).build().is_err());
    }

    #[test]
    fn test_app_cache_rejects_zero_interval() {
        assert!(AppCacheConfig::builder().refresh_interval(Duration::ZERO).build().is_err());
        assert_eq!(AppCacheConfig::default().refresh_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_transfer_defaults() {
        let config = TransferConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.batch_delay, Duration::from_millis(50));
        assert!(config.verify_counts);
    }
}
