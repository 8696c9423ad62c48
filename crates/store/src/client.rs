//! Document store interface and the client wrapper used by every caller.
//!
//! [`DocumentStore`] is the narrow contract a hierarchical document store
//! must satisfy: batched get/put/delete, conditional puts, prefix listing
//! with sync tokens, and optimistic transactions. [`StoreClient`] layers
//! the data layer's policy on top: batch splitting, read timeouts and stale
//! reads, and conflict retry.

use std::{future::Future, num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dim_sync_types::config::{ConflictRetryConfig, StoreConfig};
use snafu::ensure;

use crate::{
    batch::BatchExecutor,
    error::{Result, StoreError, TimeoutSnafu},
    keys::{KeyPath, KeyPrefix},
    metrics,
    sync_token::{ChangeEvent, SyncToken},
    transaction::{ConflictRetry, Mutation, update_document},
};

// ============================================================================
// Wire Types
// ============================================================================

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Address of the document.
    pub key: KeyPath,
    /// Encoded record.
    pub value: Vec<u8>,
    /// Store-assigned version, strictly increasing across all writes.
    pub version: u64,
    /// When the document was first created.
    pub created_at: DateTime<Utc>,
    /// When the document was last written.
    pub updated_at: DateTime<Utc>,
}

/// Precondition of a conditional put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// Fail with [`StoreError::AlreadyExists`] if the key holds a document.
    MustNotExist,
    /// Fail with [`StoreError::Conflict`] unless the current version matches.
    VersionEquals(u64),
}

/// One document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// Address to write.
    pub key: KeyPath,
    /// Encoded record.
    pub value: Vec<u8>,
    /// Optional precondition.
    pub condition: Option<PutCondition>,
    /// Creation time to record instead of "now". Ignored when the document exists.
    pub created_at: Option<DateTime<Utc>>,
}

impl PutRequest {
    /// An unconditional put.
    pub fn new(key: KeyPath, value: Vec<u8>) -> Self {
        Self { key, value, condition: None, created_at: None }
    }

    /// Requires that the key holds no document yet.
    #[must_use]
    pub fn must_not_exist(mut self) -> Self {
        self.condition = Some(PutCondition::MustNotExist);
        self
    }

    /// Records an original creation time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: Option<DateTime<Utc>>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Options for point reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Accept a slightly stale answer in exchange for a faster read.
    pub allow_stale: bool,
}

/// Options for [`DocumentStore::begin_list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Return at most this many documents. Changes to keys past the last
    /// returned one are later reported as outside the window.
    pub limit: Option<NonZeroUsize>,
}

/// Result of a list read.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Documents in key order.
    pub documents: Vec<Document>,
    /// Token for a later [`DocumentStore::sync_list`].
    pub token: SyncToken,
    /// Whether `limit` cut the listing short.
    pub truncated: bool,
}

/// Result of a sync read.
#[derive(Debug, Clone)]
pub struct SyncPage {
    /// Changes since the presented token, one per key, in commit order.
    pub events: Vec<ChangeEvent>,
    /// Token superseding the presented one.
    pub token: SyncToken,
}

/// Writes committed atomically, provided every read is still current.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionWrite {
    /// Keys read by the transaction with the version observed, `None` when absent.
    pub reads: Vec<(KeyPath, Option<u64>)>,
    /// Documents to write.
    pub puts: Vec<PutRequest>,
    /// Keys to delete.
    pub deletes: Vec<KeyPath>,
}

// ============================================================================
// Store Contract
// ============================================================================

/// Client interface of a hierarchical document store.
///
/// Calls above [`max_batch_size`](DocumentStore::max_batch_size) are rejected
/// with [`StoreError::BatchTooLarge`]; use [`StoreClient`] to split them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Largest number of keys accepted by one batched call.
    fn max_batch_size(&self) -> usize;

    /// Reads the documents that exist among `keys`, in key order.
    async fn get_batch(&self, keys: &[KeyPath], options: ReadOptions) -> Result<Vec<Document>>;

    /// Writes a batch. Every condition is checked before anything is applied;
    /// the batch is all-or-nothing.
    async fn put_batch(&self, puts: Vec<PutRequest>) -> Result<Vec<Document>>;

    /// Deletes a batch. Missing keys are ignored.
    async fn delete_batch(&self, keys: &[KeyPath]) -> Result<()>;

    /// Lists documents under `prefix` in key order and issues a sync token.
    async fn begin_list(&self, prefix: &KeyPrefix, options: ListOptions) -> Result<ListPage>;

    /// Returns changes under `prefix` since `token` was issued.
    ///
    /// Fails with [`StoreError::TokenScopeMismatch`] if the token was issued
    /// for another prefix and [`StoreError::InvalidSyncToken`] if it was not
    /// issued by this store.
    async fn sync_list(&self, prefix: &KeyPrefix, token: &SyncToken) -> Result<SyncPage>;

    /// Commits a transaction, failing with [`StoreError::Conflict`] if any
    /// read key changed since it was read. Returns the documents written.
    async fn commit(&self, write: TransactionWrite) -> Result<Vec<Document>>;
}

// ============================================================================
// Client
// ============================================================================

/// Policy layer over a [`DocumentStore`].
///
/// Bulk calls are split to the smaller of the configured and the store's
/// batch limit; reads are bounded by the configured timeouts; optimistic
/// updates retry conflicts per the configured policy.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn DocumentStore>,
    config: StoreConfig,
    retry: ConflictRetry,
}

impl StoreClient {
    /// Wraps a store with the given limits and retry policy.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: StoreConfig,
        retry: &ConflictRetryConfig,
    ) -> Self {
        Self { store, config, retry: ConflictRetry::from_config(retry) }
    }

    /// Replaces the conflict retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: ConflictRetry) -> Self {
        self.retry = retry;
        self
    }

    /// The wrapped store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Effective batch size.
    pub fn batch_size(&self) -> NonZeroUsize {
        let size = self.config.max_batch_size.min(self.store.max_batch_size());
        NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN)
    }

    /// Batch executor with the effective batch size and the given pause.
    pub fn executor(&self, delay: Duration) -> BatchExecutor {
        BatchExecutor::new(self.batch_size()).with_delay(delay)
    }

    /// Reads one document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the read exceeds `read_timeout`,
    /// or any error from the store.
    pub async fn get(&self, key: &KeyPath) -> Result<Option<Document>> {
        let docs = self
            .bounded("get", self.config.read_timeout, {
                self.store.get_batch(std::slice::from_ref(key), ReadOptions::default())
            })
            .await?;
        Ok(docs.into_iter().next())
    }

    /// Reads one document, accepting a slightly stale answer under the
    /// shorter `stale_read_timeout`. Used for low-priority reads.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the read exceeds `stale_read_timeout`.
    pub async fn get_stale(&self, key: &KeyPath) -> Result<Option<Document>> {
        let docs = self
            .bounded("get_stale", self.config.stale_read_timeout, {
                self.store.get_batch(std::slice::from_ref(key), ReadOptions { allow_stale: true })
            })
            .await?;
        Ok(docs.into_iter().next())
    }

    /// Reads many documents, one batch at a time.
    ///
    /// # Errors
    ///
    /// Returns the first batch error.
    pub async fn get_many(&self, keys: &[KeyPath]) -> Result<Vec<Document>> {
        let timeout = self.config.read_timeout;
        let pages = self
            .executor(Duration::ZERO)
            .run(keys, |chunk| {
                metrics::record_batch("get_batch", chunk.len());
                self.bounded("get_batch", timeout, {
                    self.store.get_batch(chunk, ReadOptions::default())
                })
            })
            .await?;
        Ok(pages.into_iter().flatten().collect())
    }

    /// Writes many documents, one batch at a time, pausing `delay` between batches.
    ///
    /// # Errors
    ///
    /// Returns the first batch error. Earlier batches stay written.
    pub async fn put_many(&self, puts: &[PutRequest], delay: Duration) -> Result<usize> {
        let written = self
            .executor(delay)
            .run(puts, |chunk| {
                metrics::record_batch("put_batch", chunk.len());
                self.store.put_batch(chunk.to_vec())
            })
            .await?;
        Ok(written.iter().map(Vec::len).sum())
    }

    /// Deletes many documents, one batch at a time.
    ///
    /// # Errors
    ///
    /// Returns the first batch error. Earlier batches stay deleted.
    pub async fn delete_many(&self, keys: &[KeyPath]) -> Result<()> {
        self.executor(Duration::ZERO)
            .run(keys, |chunk| {
                metrics::record_batch("delete_batch", chunk.len());
                self.store.delete_batch(chunk)
            })
            .await?;
        Ok(())
    }

    /// Lists documents under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the read exceeds `read_timeout`.
    pub async fn begin_list(
        &self,
        prefix: &KeyPrefix,
        limit: Option<NonZeroUsize>,
    ) -> Result<ListPage> {
        self.bounded("begin_list", self.config.read_timeout, {
            self.store.begin_list(prefix, ListOptions { limit })
        })
        .await
    }

    /// Lists every document under `prefix`, discarding the token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the read exceeds `read_timeout`.
    pub async fn list_all(&self, prefix: &KeyPrefix) -> Result<Vec<Document>> {
        Ok(self.begin_list(prefix, None).await?.documents)
    }

    /// Fetches changes under `prefix` since `token`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the read exceeds `read_timeout`,
    /// or the store's token validation errors.
    pub async fn sync_list(&self, prefix: &KeyPrefix, token: &SyncToken) -> Result<SyncPage> {
        let page = self
            .bounded("sync_list", self.config.read_timeout, self.store.sync_list(prefix, token))
            .await?;
        if page.events.iter().any(|e| matches!(e, ChangeEvent::Reset)) {
            metrics::record_sync_reset();
        }
        Ok(page)
    }

    /// Applies an optimistic read-modify-write to one document.
    ///
    /// See [`update_document`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConcurrentModification`] once conflicts exhaust
    /// the retry policy, or the first non-conflict error.
    pub async fn update<F>(&self, key: &KeyPath, mutate: F) -> Result<Option<Document>>
    where
        F: FnMut(Option<&Document>) -> Result<Mutation> + Send,
    {
        update_document(self.store.as_ref(), &self.retry, key, mutate).await
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        timeout: Duration,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = timeout.as_millis() as u64, "store read timed out");
                metrics::record_timeout(operation);
                TimeoutSnafu { operation, timeout_ms: timeout.as_millis() as u64 }.fail()
            },
        }
    }
}

/// Fails unless a batch fits the store's limit.
///
/// # Errors
///
/// Returns [`StoreError::BatchTooLarge`] when `size > max`.
pub fn check_batch_size(size: usize, max: usize) -> Result<()> {
    ensure!(size <= max, crate::error::BatchTooLargeSnafu { size, max });
    Ok(())
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Builds an [`StoreError::Unavailable`] for `operation`.
pub(crate) fn unavailable(operation: &str, message: impl Into<String>) -> StoreError {
    StoreError::Unavailable { operation: operation.to_string(), message: message.into() }
}
