//! Splitting bulk operations into store-sized batches.
//!
//! The document store rejects any get, put or delete call above its batch
//! limit, so every bulk operation goes through [`batches`] or the
//! [`BatchExecutor`] built on it.

use std::{future::Future, num::NonZeroUsize, time::Duration};

/// Splits `items` into consecutive chunks of at most `max_batch_size`.
///
/// Yields `ceil(len / max_batch_size)` chunks whose concatenation is `items`.
/// The iterator is `Clone`, so a sequence can be replayed from the start.
pub fn batches<T>(items: &[T], max_batch_size: NonZeroUsize) -> Batches<'_, T> {
    Batches { rest: items, size: max_batch_size.get() }
}

/// Iterator over the chunks of a slice. See [`batches`].
#[derive(Debug)]
pub struct Batches<'a, T> {
    rest: &'a [T],
    size: usize,
}

impl<T> Clone for Batches<'_, T> {
    fn clone(&self) -> Self {
        Self { rest: self.rest, size: self.size }
    }
}

impl<'a, T> Iterator for Batches<'a, T> {
    type Item = &'a [T];

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let (chunk, rest) = self.rest.split_at(self.size.min(self.rest.len()));
        self.rest = rest;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.rest.len().div_ceil(self.size);
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Batches<'_, T> {}

/// Runs a bulk operation one batch at a time.
///
/// Batches are issued sequentially, in order, with an optional pause between
/// them. A failure stops the run; batches already issued stay applied, so
/// callers must be idempotent on retry.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    max_batch_size: NonZeroUsize,
    delay: Duration,
}

impl BatchExecutor {
    /// Creates an executor with no pause between batches.
    pub const fn new(max_batch_size: NonZeroUsize) -> Self {
        Self { max_batch_size, delay: Duration::ZERO }
    }

    /// Sets the pause between consecutive batches.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Largest batch this executor issues.
    pub const fn max_batch_size(&self) -> NonZeroUsize {
        self.max_batch_size
    }

    /// Calls `op` for each batch of `items` and collects the results.
    ///
    /// # Errors
    ///
    /// Returns the first error `op` produces; later batches are not issued.
    pub async fn run<'a, T, R, E, F, Fut>(&self, items: &'a [T], mut op: F) -> Result<Vec<R>, E>
    where
        F: FnMut(&'a [T]) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let chunks = batches(items, self.max_batch_size);
        let total = chunks.len();
        let mut results = Vec::with_capacity(total);
        for (index, chunk) in chunks.enumerate() {
            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            tracing::debug!(batch = index + 1, of = total, size = chunk.len(), "issuing batch");
            results.push(op(chunk).await?);
        }
        Ok(results)
    }
}
