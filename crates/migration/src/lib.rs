//! Live migration of DIM profile data from the legacy store to the document store.
//!
//! - [`MigrationCoordinator`]: the per-account state machine. Transitions are
//!   compare-and-swap writes, so concurrent starts for one account have
//!   exactly one winner.
//! - [`BulkTransfer`]: the idempotent export, wipe-and-import copy between
//!   the stores.
//! - [`ProfileRouter`]: sends each request to the store that owns the account,
//!   migrates selected accounts on their first write, and wipes both stores
//!   on delete-all-data.
//!
//! ## Wiring
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use dim_sync_migration::{BulkTransfer, MigrationCoordinator, ProfileRouter};
//! use dim_sync_profile::{MemoryLegacyStore, ProfileStore};
//! use dim_sync_store::{InMemoryDocumentStore, StoreClient};
//! use dim_sync_types::{AccountId, config::SyncConfig};
//!
//! # async fn example() -> dim_sync_migration::Result<()> {
//! let config = SyncConfig::default();
//! let legacy = Arc::new(MemoryLegacyStore::new());
//! let memory = Arc::new(InMemoryDocumentStore::new(&config.store));
//! let client = StoreClient::new(memory, config.store.clone(), &config.conflict_retry);
//! let document = Arc::new(ProfileStore::new(client, &config.transfer));
//!
//! let coordinator =
//!     MigrationCoordinator::new(legacy.clone(), &config.migration, &config.conflict_retry);
//! let transfer = BulkTransfer::new(legacy, document, &config.transfer);
//! let router = ProfileRouter::new(coordinator, transfer, &config.migration);
//!
//! let owner = router.get_owner_state(AccountId::new(4321)).await?;
//! println!("served by {:?}", owner.store);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod router;
pub mod transfer;

pub use coordinator::MigrationCoordinator;
pub use error::{MigrationError, Result};
pub use router::{DeletedRecords, OwnerState, ProfileRouter};
pub use transfer::{BulkTransfer, TransferReport};
