//! Document store client and optimistic transaction configuration.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ConfigError, require_nonzero};

/// Largest batch the document store protocol accepts.
pub const MAX_STORE_BATCH_SIZE: usize = 1000;

/// Document store client configuration.
///
/// # Validation Rules
///
/// - `max_batch_size` must be 1-1000
/// - `read_timeout` and `stale_read_timeout` must be > 0
/// - `change_log_capacity` must be > 0
///
/// # Example
///
/// ```no_run
/// # use dim_sync_types::config::StoreConfig;
/// # use std::time::Duration;
/// let config = StoreConfig::builder()
///     .max_batch_size(25)
///     .read_timeout(Duration::from_secs(2))
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Maximum number of keys per get, put or delete call.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Upper bound on any single store read.
    #[serde(default = "default_read_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub read_timeout: Duration,
    /// Upper bound on reads that accept slightly stale data.
    #[serde(default = "default_stale_read_timeout")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub stale_read_timeout: Duration,
    /// Number of change events the store retains for incremental sync.
    ///
    /// Sync tokens older than the retained window are answered with a reset.
    #[serde(default = "default_change_log_capacity")]
    pub change_log_capacity: usize,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    #[builder]
    pub fn new(
        #[builder(default = default_max_batch_size())] max_batch_size: usize,
        #[builder(default = default_read_timeout())] read_timeout: Duration,
        #[builder(default = default_stale_read_timeout())] stale_read_timeout: Duration,
        #[builder(default = default_change_log_capacity())] change_log_capacity: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_batch_size, read_timeout, stale_read_timeout, change_log_capacity };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_STORE_BATCH_SIZE {
            return Err(ConfigError::Validation {
                message: format!(
                    "max_batch_size must be 1-{}, got {}",
                    MAX_STORE_BATCH_SIZE, self.max_batch_size
                ),
            });
        }
        require_nonzero("read_timeout", self.read_timeout)?;
        require_nonzero("stale_read_timeout", self.stale_read_timeout)?;
        if self.change_log_capacity == 0 {
            return Err(ConfigError::Validation {
                message: "change_log_capacity must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            read_timeout: default_read_timeout(),
            stale_read_timeout: default_stale_read_timeout(),
            change_log_capacity: default_change_log_capacity(),
        }
    }
}

fn default_max_batch_size() -> usize {
    50
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_stale_read_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_change_log_capacity() -> usize {
    10_000
}

// =========================================================================
// ConflictRetryConfig
// =========================================================================

/// Bounded retry policy for optimistic transactions.
///
/// A conflicting read-modify-write is retried up to `max_attempts` times in
/// total, sleeping a random duration in `min_backoff..=max_backoff` between
/// attempts.
///
/// # Validation Rules
///
/// - `max_attempts` must be >= 1
/// - `min_backoff` must be <= `max_backoff`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConflictRetryConfig {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Lower bound of the randomized backoff.
    #[serde(default = "default_min_backoff")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub min_backoff: Duration,
    /// Upper bound of the randomized backoff.
    #[serde(default = "default_max_backoff")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub max_backoff: Duration,
}

#[bon::bon]
impl ConflictRetryConfig {
    /// Creates a new retry configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_attempts` is zero or the
    /// backoff bounds are inverted.
    #[builder]
    pub fn new(
        #[builder(default = default_max_attempts())] max_attempts: u32,
        #[builder(default = default_min_backoff())] min_backoff: Duration,
        #[builder(default = default_max_backoff())] max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_attempts, min_backoff, max_backoff };
        config.validate()?;
        Ok(config)
    }
}

impl ConflictRetryConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be >= 1".to_string(),
            });
        }
        if self.min_backoff > self.max_backoff {
            return Err(ConfigError::Validation {
                message: format!(
                    "min_backoff ({:?}) must be <= max_backoff ({:?})",
                    self.min_backoff, self.max_backoff
                ),
            });
        }
        Ok(())
    }
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_min_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_millis(200)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_defaults_are_valid() {
        let config = StoreConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.change_log_capacity, 10_000);
    }

    #[test]
    fn test_store_config_batch_size_bounds() {
        assert!(StoreConfig::builder().max_batch_size(1).build().is_ok());
        assert!(StoreConfig::builder().max_batch_size(MAX_STORE_BATCH_SIZE).build().is_ok());
        assert!(StoreConfig::builder().max_batch_size(0).build().is_err());
        let err = StoreConfig::builder().max_batch_size(1001).build().unwrap_err();
        assert!(err.to_string().contains("max_batch_size"));
    }

    #[test]
    fn test_store_config_zero_timeout_rejected() {
        let err = StoreConfig::builder().read_timeout(Duration::ZERO).build().unwrap_err();
        assert!(err.to_string().contains("read_timeout"));
        assert!(StoreConfig::builder().stale_read_timeout(Duration::ZERO).build().is_err());
        assert!(StoreConfig::builder().change_log_capacity(0).build().is_err());
    }

    #[test]
    fn test_conflict_retry_defaults() {
        let config = ConflictRetryConfig::builder().build().expect("defaults should be valid");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.min_backoff, Duration::from_millis(100));
        assert_eq!(config.max_backoff, Duration::from_millis(200));
    }

    #[test]
    fn test_conflict_retry_rejects_zero_attempts() {
        assert!(ConflictRetryConfig::builder().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_conflict_retry_rejects_inverted_backoff() {
        let err = ConflictRetryConfig::builder()
            .min_backoff(Duration::from_millis(300))
            .max_backoff(Duration::from_millis(200))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("min_backoff"));
    }

    #[test]
    fn test_conflict_retry_equal_bounds_allowed() {
        let config = ConflictRetryConfig::builder()
            .min_backoff(Duration::ZERO)
            .max_backoff(Duration::ZERO)
            .build()
            .expect("zero backoff is valid");
        assert_eq!(config.max_backoff, Duration::ZERO);
    }
}
