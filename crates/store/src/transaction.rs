//! Optimistic read-modify-write with bounded conflict retry.
//!
//! [`ConflictRetry`] is the one retry helper every optimistic call site
//! shares: a total attempt budget plus a backoff function of the attempt
//! number. [`with_retry`] drives any fallible async operation with it, and
//! [`update_document`] builds the single-document transaction on top.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use backon::{BackoffBuilder, Retryable};
use dim_sync_types::config::ConflictRetryConfig;
use parking_lot::Mutex;
use rand::Rng;

use crate::{
    client::{Document, DocumentStore, PutRequest, ReadOptions, TransactionWrite},
    error::{Result, StoreError},
    keys::KeyPath,
    metrics,
};

/// Backoff function: attempt number (1-based, the attempt that just failed) to delay.
type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Bounded retry policy.
#[derive(Clone)]
pub struct ConflictRetry {
    max_attempts: u32,
    backoff: BackoffFn,
}

impl ConflictRetry {
    /// Creates a policy with `max_attempts` total attempts (at least one) and
    /// the given backoff function.
    pub fn new(max_attempts: u32, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self { max_attempts: max_attempts.max(1), backoff: Arc::new(backoff) }
    }

    /// Randomized backoff uniformly drawn from `min_backoff..=max_backoff`.
    pub fn from_config(config: &ConflictRetryConfig) -> Self {
        let (min, max) = (config.min_backoff, config.max_backoff.max(config.min_backoff));
        Self::new(config.max_attempts, move |_| random_between(min, max))
    }

    /// Retries immediately, without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, |_| Duration::ZERO)
    }

    /// Total attempts, including the first.
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }
}

impl fmt::Debug for ConflictRetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictRetry").field("max_attempts", &self.max_attempts).finish_non_exhaustive()
    }
}

/// Iterator of delays between attempts; yields `max_attempts - 1` values.
pub struct RetryDelays {
    policy: ConflictRetry,
    next_attempt: u32,
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.next_attempt >= self.policy.max_attempts {
            return None;
        }
        let delay = self.policy.delay(self.next_attempt);
        self.next_attempt += 1;
        Some(delay)
    }
}

impl BackoffBuilder for ConflictRetry {
    type Backoff = RetryDelays;

    fn build(self) -> Self::Backoff {
        RetryDelays { policy: self, next_attempt: 1 }
    }
}

fn random_between(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let nanos = rand::rng().random_range(min.as_nanos() as u64..=max.as_nanos() as u64);
    Duration::from_nanos(nanos)
}

/// Runs `operation`, retrying errors selected by `should_retry` per `policy`.
///
/// Returns the last error once the attempt budget is spent.
///
/// # Errors
///
/// Returns the first error `should_retry` rejects, or the error of the final attempt.
pub async fn with_retry<T, E, F, Fut, P>(
    policy: &ConflictRetry,
    operation_name: &str,
    should_retry: P,
    operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: fmt::Display,
{
    let attempt = AtomicU32::new(1);
    operation
        .retry(policy.clone())
        .sleep(tokio::time::sleep)
        .when(should_retry)
        .notify(|err: &E, dur: Duration| {
            let failed = attempt.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                operation = operation_name,
                attempt = failed,
                backoff_ms = dur.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );
        })
        .await
}

/// Outcome of the mutate step of [`update_document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Write this value.
    Put(Vec<u8>),
    /// Delete the document.
    Delete,
    /// Leave the document as it is.
    Keep,
}

/// Read-modify-write of one document under optimistic concurrency.
///
/// Reads the current document, hands it to `mutate`, and commits the result
/// conditioned on the version read. When another writer commits in between,
/// the whole cycle is repeated per `policy`; `mutate` may therefore run more
/// than once and must not have side effects beyond its return value.
///
/// Returns the document as left by this call (`None` if deleted or absent).
///
/// # Errors
///
/// Returns [`StoreError::ConcurrentModification`] once conflicts exhaust the
/// policy, or the first other error from the store or `mutate`.
pub async fn update_document<F>(
    store: &dyn DocumentStore,
    policy: &ConflictRetry,
    key: &KeyPath,
    mutate: F,
) -> Result<Option<Document>>
where
    F: FnMut(Option<&Document>) -> Result<Mutation> + Send,
{
    let mutate = &Mutex::new(mutate);
    let result = with_retry(
        policy,
        "update_document",
        |err: &StoreError| {
            let conflict = err.is_conflict();
            if conflict {
                metrics::record_transaction_conflict();
            }
            conflict
        },
        || async move {
            let current = store
                .get_batch(std::slice::from_ref(key), ReadOptions::default())
                .await?
                .into_iter()
                .next();
            let mutation = {
                let mut mutate = mutate.lock();
                (*mutate)(current.as_ref())?
            };
            let read = (key.clone(), current.as_ref().map(|doc| doc.version));
            match mutation {
                Mutation::Keep => Ok(current),
                Mutation::Delete if current.is_none() => Ok(None),
                Mutation::Delete => {
                    let write = TransactionWrite {
                        reads: vec![read],
                        puts: Vec::new(),
                        deletes: vec![key.clone()],
                    };
                    store.commit(write).await?;
                    Ok(None)
                },
                Mutation::Put(value) => {
                    let write = TransactionWrite {
                        reads: vec![read],
                        puts: vec![PutRequest::new(key.clone(), value)],
                        deletes: Vec::new(),
                    };
                    Ok(store.commit(write).await?.into_iter().next())
                },
            }
        },
    )
    .await;

    match result {
        Err(StoreError::Conflict { key: conflicted }) => {
            metrics::record_transaction_exhausted();
            tracing::warn!(
                key = %conflicted,
                attempts = policy.max_attempts(),
                "optimistic transaction exhausted its retries"
            );
            Err(StoreError::ConcurrentModification {
                key: conflicted,
                attempts: policy.max_attempts(),
            })
        },
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use dim_sync_types::{AccountId, config::StoreConfig};

    use super::*;
    use crate::{keys::settings_key, memory::InMemoryDocumentStore};

    fn counter_key() -> KeyPath {
        settings_key(AccountId::new(1))
    }

    fn increment(doc: Option<&Document>) -> Result<Mutation> {
        let current = doc.map(|d| d.value[0]).unwrap_or(0);
        Ok(Mutation::Put(vec![current + 1]))
    }

    #[test]
    fn test_retry_delays_yield_attempts_minus_one() {
        let policy = ConflictRetry::new(3, |attempt| Duration::from_millis(u64::from(attempt)));
        let delays: Vec<Duration> = policy.build().collect();
        assert_eq!(delays, vec![Duration::from_millis(1), Duration::from_millis(2)]);
        assert_eq!(ConflictRetry::immediate(0).max_attempts(), 1);
    }

    #[test]
    fn test_config_backoff_stays_in_bounds() {
        let config = ConflictRetryConfig::default();
        let policy = ConflictRetry::from_config(&config);
        for attempt in 1..50 {
            let delay = policy.delay(attempt);
            assert!(delay >= config.min_backoff && delay <= config.max_backoff, "{delay:?}");
        }
    }

    #[tokio::test]
    async fn test_update_creates_then_increments() {
        let store = InMemoryDocumentStore::new(&StoreConfig::default());
        let policy = ConflictRetry::immediate(3);
        let first = update_document(&store, &policy, &counter_key(), increment)
            .await
            .expect("create")
            .expect("document");
        assert_eq!(first.value, vec![1]);
        let second = update_document(&store, &policy, &counter_key(), increment)
            .await
            .expect("update")
            .expect("document");
        assert_eq!(second.value, vec![2]);
        assert!(second.version > first.version);
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn test_update_retries_injected_conflicts() {
        let store = InMemoryDocumentStore::new(&StoreConfig::default());
        store.faults().inject_conflicts(2);
        let calls = AtomicUsize::new(0);
        let doc = update_document(&store, &ConflictRetry::immediate(3), &counter_key(), |doc| {
            calls.fetch_add(1, Ordering::SeqCst);
            increment(doc)
        })
        .await
        .expect("third attempt succeeds");
        assert_eq!(doc.expect("document").value, vec![1]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_update_surfaces_concurrent_modification() {
        let store = InMemoryDocumentStore::new(&StoreConfig::default());
        store.faults().inject_conflicts(3);
        let err = update_document(&store, &ConflictRetry::immediate(3), &counter_key(), increment)
            .await
            .unwrap_err();
        assert!(
            matches!(err, StoreError::ConcurrentModification { attempts: 3, .. }),
            "unexpected {err:?}"
        );
        assert!(store.get_batch(&[counter_key()], ReadOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_does_not_retry_other_errors() {
        let store = InMemoryDocumentStore::new(&StoreConfig::default());
        let calls = AtomicUsize::new(0);
        let err = update_document(&store, &ConflictRetry::immediate(5), &counter_key(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::AlreadyExists { key: "x".into() })
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_and_keep() {
        let store = InMemoryDocumentStore::new(&StoreConfig::default());
        let policy = ConflictRetry::immediate(1);
        update_document(&store, &policy, &counter_key(), increment).await.expect("create");
        let kept = update_document(&store, &policy, &counter_key(), |_| Ok(Mutation::Keep))
            .await
            .expect("keep");
        assert_eq!(kept.expect("still there").value, vec![1]);
        let deleted = update_document(&store, &policy, &counter_key(), |_| Ok(Mutation::Delete))
            .await
            .expect("delete");
        assert!(deleted.is_none());
        // Deleting an absent document is a no-op.
        update_document(&store, &policy, &counter_key(), |_| Ok(Mutation::Delete))
            .await
            .expect("delete absent");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryDocumentStore::new(&StoreConfig::default()));
        let policy = ConflictRetry::new(50, |_| Duration::from_millis(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                update_document(store.as_ref(), &policy, &counter_key(), increment).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("increment");
        }
        let docs = store.get_batch(&[counter_key()], ReadOptions::default()).await.unwrap();
        assert_eq!(docs[0].value, vec![8]);
    }
}
