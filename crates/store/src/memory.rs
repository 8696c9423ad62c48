//! In-memory document store.
//!
//! Implements the full [`DocumentStore`] contract (batch limits, conditional
//! puts, optimistic commits, and sync tokens backed by a bounded change log)
//! so the rest of the data layer can be exercised without a network store.
//! A [`FaultInjector`] lets tests simulate outages, slow calls and conflicts.

use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use dim_sync_types::config::StoreConfig;
use parking_lot::RwLock;
use snafu::ensure;

use crate::{
    client::{
        Document, DocumentStore, ListOptions, ListPage, PutCondition, PutRequest, ReadOptions,
        SyncPage, TransactionWrite, check_batch_size, unavailable,
    },
    error::{AlreadyExistsSnafu, ConflictSnafu, DuplicateKeySnafu, Result},
    keys::{KeyPath, KeyPrefix},
    sync_token::{ChangeEvent, SyncToken, SyncTokenCodec},
};

// ============================================================================
// Fault Injection
// ============================================================================

/// Failure injection shared by the in-memory stores.
#[derive(Debug)]
pub struct FaultInjector {
    /// Remaining calls to fail as unavailable.
    unavailable_count: AtomicUsize,
    /// Remaining commits to fail with a conflict.
    conflict_count: AtomicUsize,
    /// Delay applied to every call.
    delay_ms: AtomicU64,
    /// Remaining writes before writes start failing; `usize::MAX` for no limit.
    writes_allowed: AtomicUsize,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self {
            unavailable_count: AtomicUsize::new(0),
            conflict_count: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            writes_allowed: AtomicUsize::new(usize::MAX),
        }
    }
}

impl FaultInjector {
    /// Fails the next `count` calls as unavailable.
    pub fn inject_unavailable(&self, count: usize) {
        self.unavailable_count.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` commits with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.conflict_count.store(count, Ordering::SeqCst);
    }

    /// Delays every subsequent call. Zero disables the delay.
    pub fn inject_delay(&self, millis: u64) {
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Lets `count` more write calls succeed, then fails every write.
    pub fn fail_writes_after(&self, count: usize) {
        self.writes_allowed.store(count, Ordering::SeqCst);
    }

    /// Removes every injected fault.
    pub fn clear(&self) {
        self.unavailable_count.store(0, Ordering::SeqCst);
        self.conflict_count.store(0, Ordering::SeqCst);
        self.delay_ms.store(0, Ordering::SeqCst);
        self.writes_allowed.store(usize::MAX, Ordering::SeqCst);
    }

    /// Applies the configured delay, then fails if an outage is injected.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Unavailable`] while injected failures remain.
    pub async fn check(&self, operation: &str) -> Result<()> {
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if take_one(&self.unavailable_count) {
            return Err(unavailable(operation, "injected failure"));
        }
        Ok(())
    }

    /// Counts a write against the [`fail_writes_after`](Self::fail_writes_after) budget.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::Unavailable`] once the budget is spent.
    pub fn check_write(&self, operation: &str) -> Result<()> {
        loop {
            let current = self.writes_allowed.load(Ordering::SeqCst);
            if current == usize::MAX {
                return Ok(());
            }
            if current == 0 {
                return Err(unavailable(operation, "injected write failure"));
            }
            if self
                .writes_allowed
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Whether the current commit should fail with an injected conflict.
    pub fn take_conflict(&self) -> bool {
        take_one(&self.conflict_count)
    }
}

/// Decrements `counter` if positive, returning whether it did.
fn take_one(counter: &AtomicUsize) -> bool {
    loop {
        let current = counter.load(Ordering::SeqCst);
        if current == 0 {
            return false;
        }
        if counter
            .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return true;
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    docs: BTreeMap<KeyPath, Document>,
    /// Sequence number of the last write; also the version of that document.
    seq: u64,
    /// Keys written or deleted, oldest first.
    log: VecDeque<(u64, KeyPath)>,
    /// Highest sequence number no longer in the log.
    log_floor: u64,
}

impl Inner {
    fn record(&mut self, key: KeyPath, capacity: usize) {
        self.log.push_back((self.seq, key));
        while self.log.len() > capacity {
            if let Some((seq, _)) = self.log.pop_front() {
                self.log_floor = seq;
            }
        }
    }

    fn check_conditions(&self, puts: &[PutRequest]) -> Result<()> {
        for put in puts {
            let current = self.docs.get(&put.key).map(|doc| doc.version);
            match put.condition {
                Some(PutCondition::MustNotExist) => {
                    ensure!(current.is_none(), AlreadyExistsSnafu { key: put.key.to_string() });
                },
                Some(PutCondition::VersionEquals(expected)) => {
                    ensure!(current == Some(expected), ConflictSnafu { key: put.key.to_string() });
                },
                None => {},
            }
        }
        Ok(())
    }

    fn apply_put(&mut self, put: PutRequest, capacity: usize) -> Document {
        let now = Utc::now();
        self.seq += 1;
        let created_at = self
            .docs
            .get(&put.key)
            .map(|existing| existing.created_at)
            .or(put.created_at)
            .unwrap_or(now);
        let doc = Document {
            key: put.key.clone(),
            value: put.value,
            version: self.seq,
            created_at,
            updated_at: now,
        };
        self.docs.insert(put.key.clone(), doc.clone());
        self.record(put.key, capacity);
        doc
    }

    fn apply_delete(&mut self, key: &KeyPath, capacity: usize) {
        if self.docs.remove(key).is_some() {
            self.seq += 1;
            self.record(key.clone(), capacity);
        }
    }
}

/// Document store held in process memory.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    inner: RwLock<Inner>,
    codec: SyncTokenCodec,
    max_batch_size: usize,
    log_capacity: usize,
    faults: FaultInjector,
}

impl InMemoryDocumentStore {
    /// Creates an empty store enforcing the configured batch limit and change-log capacity.
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            codec: SyncTokenCodec::with_random_key(),
            max_batch_size: config.max_batch_size.max(1),
            log_capacity: config.change_log_capacity.max(1),
            faults: FaultInjector::default(),
        }
    }

    /// Failure injection for this store.
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Number of documents under `prefix`.
    pub fn document_count(&self, prefix: &KeyPrefix) -> usize {
        self.inner.read().docs.keys().filter(|key| prefix.matches(key)).count()
    }

    /// Total number of documents.
    pub fn len(&self) -> usize {
        self.inner.read().docs.len()
    }

    /// Whether the store holds no documents.
    pub fn is_empty(&self) -> bool {
        self.inner.read().docs.is_empty()
    }

    /// Drops the whole change log, so every outstanding token gets a reset.
    pub fn truncate_change_log(&self) {
        let mut inner = self.inner.write();
        inner.log.clear();
        inner.log_floor = inner.seq;
    }

    fn check_unique<'a>(&self, keys: impl Iterator<Item = &'a KeyPath>) -> Result<()> {
        let mut seen = HashSet::new();
        for key in keys {
            ensure!(seen.insert(key), DuplicateKeySnafu { key: key.to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn get_batch(&self, keys: &[KeyPath], _options: ReadOptions) -> Result<Vec<Document>> {
        self.faults.check("get_batch").await?;
        check_batch_size(keys.len(), self.max_batch_size)?;
        let inner = self.inner.read();
        let mut found: Vec<Document> =
            keys.iter().filter_map(|key| inner.docs.get(key).cloned()).collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        found.dedup_by(|a, b| a.key == b.key);
        Ok(found)
    }

    async fn put_batch(&self, puts: Vec<PutRequest>) -> Result<Vec<Document>> {
        self.faults.check("put_batch").await?;
        check_batch_size(puts.len(), self.max_batch_size)?;
        self.check_unique(puts.iter().map(|put| &put.key))?;
        self.faults.check_write("put_batch")?;

        let mut inner = self.inner.write();
        inner.check_conditions(&puts)?;
        Ok(puts.into_iter().map(|put| inner.apply_put(put, self.log_capacity)).collect())
    }

    async fn delete_batch(&self, keys: &[KeyPath]) -> Result<()> {
        self.faults.check("delete_batch").await?;
        check_batch_size(keys.len(), self.max_batch_size)?;
        self.faults.check_write("delete_batch")?;

        let mut inner = self.inner.write();
        for key in keys {
            inner.apply_delete(key, self.log_capacity);
        }
        Ok(())
    }

    async fn begin_list(&self, prefix: &KeyPrefix, options: ListOptions) -> Result<ListPage> {
        self.faults.check("begin_list").await?;
        let inner = self.inner.read();
        let mut matching = inner.docs.values().filter(|doc| prefix.matches(&doc.key));
        let documents: Vec<Document> = match options.limit {
            Some(limit) => matching.by_ref().take(limit.get()).cloned().collect(),
            None => matching.by_ref().cloned().collect(),
        };
        let truncated = matching.next().is_some();
        let window_end = if truncated { documents.last().map(|doc| doc.key.clone()) } else { None };
        let token = self.codec.issue(prefix, window_end, inner.seq)?;
        Ok(ListPage { documents, token, truncated })
    }

    async fn sync_list(&self, prefix: &KeyPrefix, token: &SyncToken) -> Result<SyncPage> {
        self.faults.check("sync_list").await?;
        let payload = self.codec.open_for(token, prefix)?;
        let inner = self.inner.read();

        if payload.watermark < inner.log_floor {
            tracing::debug!(
                prefix = %prefix,
                watermark = payload.watermark,
                log_floor = inner.log_floor,
                "sync token predates the change log"
            );
            let token = self.codec.issue(prefix, payload.window_end, inner.seq)?;
            return Ok(SyncPage { events: vec![ChangeEvent::Reset], token });
        }

        // One event per key, ordered by the key's last change.
        let mut seen = HashSet::new();
        let mut changed: Vec<&KeyPath> = inner
            .log
            .iter()
            .rev()
            .take_while(|(seq, _)| *seq > payload.watermark)
            .filter(|(_, key)| prefix.matches(key) && seen.insert(key))
            .map(|(_, key)| key)
            .collect();
        changed.reverse();

        let events = changed
            .into_iter()
            .map(|key| match inner.docs.get(key) {
                _ if !payload.in_window(key) => ChangeEvent::UpdatedOutsideWindow(key.clone()),
                Some(doc) => ChangeEvent::Changed(doc.clone()),
                None => ChangeEvent::Deleted(key.clone()),
            })
            .collect();
        let token = self.codec.issue(prefix, payload.window_end, inner.seq)?;
        Ok(SyncPage { events, token })
    }

    async fn commit(&self, write: TransactionWrite) -> Result<Vec<Document>> {
        self.faults.check("commit").await?;
        check_batch_size(write.puts.len() + write.deletes.len(), self.max_batch_size)?;
        self.check_unique(write.puts.iter().map(|put| &put.key).chain(write.deletes.iter()))?;
        if self.faults.take_conflict() {
            let key = write.reads.first().map_or_else(String::new, |(key, _)| key.to_string());
            return ConflictSnafu { key }.fail();
        }
        self.faults.check_write("commit")?;

        let mut inner = self.inner.write();
        for (key, expected) in &write.reads {
            let current = inner.docs.get(key).map(|doc| doc.version);
            ensure!(current == *expected, ConflictSnafu { key: key.to_string() });
        }
        inner.check_conditions(&write.puts)?;
        let written =
            write.puts.into_iter().map(|put| inner.apply_put(put, self.log_capacity)).collect();
        for key in &write.deletes {
            inner.apply_delete(key, self.log_capacity);
        }
        Ok(written)
    }
}
