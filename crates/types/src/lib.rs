//! Core types for the DIM profile data layer.
//!
//! This crate provides the vocabulary shared by both backing stores and the
//! migration engine:
//! - Identifier newtypes and canonical hash normalization
//! - Domain records (settings, loadouts, annotations, searches, apps)
//! - Profile read requests and update actions
//! - The full-account export snapshot
//! - Per-account migration state
//! - Error codes, the record codec and configuration

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod migration;
pub mod profile;
pub mod snapshot;
pub mod types;

// Re-export commonly used types at crate root
pub use codec::{CodecError, decode, encode};
pub use domain::*;
pub use error::ErrorCode;
pub use migration::{MigrationState, MigrationStatus};
pub use profile::*;
pub use snapshot::*;
pub use types::*;
