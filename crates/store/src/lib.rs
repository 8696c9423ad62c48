//! dim-sync-store: storage primitives over a hierarchical document store.
//!
//! Everything the profile adapter and the migration engine need to address
//! and mutate documents safely:
//!
//! - **Key paths**: reversible `/<ns>-<id>/...` addresses, with prefixes that
//!   select a scope or one entity kind as a contiguous range
//! - **Batching**: every bulk call is split to the store's hard batch limit
//! - **Optimistic transactions**: read-modify-write with bounded conflict retry
//! - **Sync tokens**: authenticated cursors for incremental list refresh
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 StoreClient                  │
//! │  (batch splitting, timeouts, conflict retry) │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │           DocumentStore (trait)              │
//! │ get/put/delete batch, list, sync, commit     │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │   InMemoryDocumentStore / network client     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dim_sync_store::{InMemoryDocumentStore, PutRequest, StoreClient, settings_key};
//! use dim_sync_types::{AccountId, config::{ConflictRetryConfig, StoreConfig}};
//!
//! # async fn example() -> dim_sync_store::Result<()> {
//! let config = StoreConfig::default();
//! let store = Arc::new(InMemoryDocumentStore::new(&config));
//! let client = StoreClient::new(store, config, &ConflictRetryConfig::default());
//!
//! let key = settings_key(AccountId::new(1));
//! client.put_many(&[PutRequest::new(key.clone(), vec![1])], Default::default()).await?;
//! assert!(client.get(&key).await?.is_some());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod client;
pub mod error;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod sync_token;
pub mod transaction;

pub use batch::{BatchExecutor, Batches, batches};
pub use client::{
    Document, DocumentStore, ListOptions, ListPage, PutCondition, PutRequest, ReadOptions,
    StoreClient, SyncPage, TransactionWrite,
};
pub use error::{Result, StoreError};
pub use keys::*;
pub use memory::{FaultInjector, InMemoryDocumentStore};
pub use sync_token::{ChangeEvent, SyncToken, SyncTokenCodec, TokenPayload, merge_events};
pub use transaction::{ConflictRetry, Mutation, update_document, with_retry};
