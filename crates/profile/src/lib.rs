//! Profile data adapters for DIM sync.
//!
//! Two stores hold profile data, and both speak [`ProfileBackend`]:
//!
//! - [`ProfileStore`]: the document store adapter. It converts each entity kind to and from its stored record,
//!   addresses documents through the key codec, and issues sync tokens for incremental reads.
//! - [`MemoryLegacyStore`]: the relational store, row-per-record, which also keeps per-account
//!   migration state behind [`MigrationStateStore`].
//!
//! [`StoredItem`] is the closed set of entity kinds in the document store. Bulk
//! scans classify every document through it.
//!
//! [`AppCache`] holds app registrations for request authentication.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app_cache;
pub mod backend;
pub mod document;
pub mod error;
mod import;
pub mod kind;
pub mod legacy;
mod records;

pub use app_cache::AppCache;
pub use backend::{ImportStats, MigrationStateStore, ProfileBackend, SwapOutcome};
pub use document::{ProfileStore, SyncDelta, Synced};
pub use error::{ProfileError, Result};
pub use kind::{StoredItem, search_digest};
pub use legacy::MemoryLegacyStore;
