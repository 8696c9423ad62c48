//! Configuration for the profile data layer.
//!
//! Every section is deserializable from TOML with humantime durations, is
//! constructed through a fallible builder that validates its values, and
//! exposes `validate()` for post-deserialization checks.

// The schemars `JsonSchema` derive expands to code containing `.unwrap()`.
#![allow(clippy::disallowed_methods)]

mod migration;
mod store;

pub use migration::*;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
pub use store::*;

/// Configuration validation error.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// The configuration document could not be parsed.
    #[snafu(display("failed to parse config: {source}"))]
    Parse {
        /// The underlying TOML error.
        source: toml::de::Error,
    },
}

/// Complete configuration of the data layer.
///
/// Missing sections take their defaults, so an empty document is a valid
/// configuration.
///
/// # Example
///
/// ```no_run
/// # use dim_sync_types::config::SyncConfig;
/// let config = SyncConfig::from_toml_str(
///     r#"
///     [store]
///     max_batch_size = 25
///
///     [migration.rollout]
///     enabled = true
///     percentage = 10
///     "#,
/// )
/// .expect("valid config");
/// assert_eq!(config.store.max_batch_size, 25);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, bon::Builder)]
pub struct SyncConfig {
    /// Document store client limits and timeouts.
    #[serde(default)]
    #[builder(default)]
    pub store: StoreConfig,
    /// Optimistic transaction retry policy.
    #[serde(default)]
    #[builder(default)]
    pub conflict_retry: ConflictRetryConfig,
    /// Bulk transfer pacing and verification.
    #[serde(default)]
    #[builder(default)]
    pub transfer: TransferConfig,
    /// Migration coordinator settings, including the rollout policy.
    #[serde(default)]
    #[builder(default)]
    pub migration: MigrationConfig,
    /// App registration cache settings.
    #[serde(default)]
    #[builder(default)]
    pub app_cache: AppCacheConfig,
}

impl SyncConfig {
    /// Parses and validates a TOML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Validation`] when any section holds an invalid value.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents).context(ParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::Validation`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.conflict_retry.validate()?;
        self.transfer.validate()?;
        self.migration.validate()?;
        self.app_cache.validate()
    }
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Rejects a zero duration for the named field.
fn require_nonzero(field: &str, value: std::time::Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Validation { message: format!("{field} must be > 0") });
    }
    Ok(())
}
