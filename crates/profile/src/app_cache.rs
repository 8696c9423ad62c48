//! Registered-app lookup cache.
//!
//! Every API request is authenticated by its app's DIM API key, so the app
//! table is held in memory and reloaded from the document store once the
//! refresh interval has passed. The cache is an ordinary owned value: build
//! one per service (or per test) and pass it where lookups happen.
//!
//! # Example
//!
//! ```no_run
//! # use dim_sync_profile::{AppCache, ProfileStore};
//! # use dim_sync_types::config::AppCacheConfig;
//! # async fn example(store: ProfileStore) -> dim_sync_profile::Result<()> {
//! let cache = AppCache::new(store, &AppCacheConfig::default());
//! let key = uuid::Uuid::new_v4();
//! if cache.lookup(key).await?.is_none() {
//!     // reject the request
//! }
//! # Ok(())
//! # }
//! ```

use std::{collections::HashMap, time::Duration};

use dim_sync_types::{App, config::AppCacheConfig};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::{document::ProfileStore, error::Result};

#[derive(Debug, Default)]
struct CacheState {
    by_key: HashMap<Uuid, App>,
    loaded_at: Option<Instant>,
}

/// Cache of registered apps keyed by DIM API key.
pub struct AppCache {
    store: ProfileStore,
    refresh_interval: Duration,
    state: RwLock<CacheState>,
}

impl AppCache {
    /// Creates an empty cache; the first lookup loads it.
    pub fn new(store: ProfileStore, config: &AppCacheConfig) -> Self {
        Self {
            store,
            refresh_interval: config.refresh_interval,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Whether the next lookup will reload from the store.
    pub fn is_stale(&self) -> bool {
        self.state
            .read()
            .loaded_at
            .is_none_or(|loaded_at| loaded_at.elapsed() >= self.refresh_interval)
    }

    /// Reloads every app from the store.
    ///
    /// # Errors
    ///
    /// Returns the store error; the previous contents stay in place.
    pub async fn refresh(&self) -> Result<usize> {
        let apps = self.store.list_apps().await?;
        let by_key: HashMap<Uuid, App> =
            apps.into_iter().map(|app| (app.dim_api_key, app)).collect();
        let count = by_key.len();
        *self.state.write() = CacheState { by_key, loaded_at: Some(Instant::now()) };
        debug!(apps = count, "refreshed app cache");
        Ok(count)
    }

    /// Marks the cache stale so the next lookup reloads it.
    pub fn invalidate(&self) {
        self.state.write().loaded_at = None;
    }

    /// The cached app for `dim_api_key`, without touching the store.
    pub fn get_cached(&self, dim_api_key: Uuid) -> Option<App> {
        self.state.read().by_key.get(&dim_api_key).cloned()
    }

    /// The app for `dim_api_key`, refreshing first if the cache is stale.
    ///
    /// # Errors
    ///
    /// Returns the store error if a needed refresh fails.
    pub async fn lookup(&self, dim_api_key: Uuid) -> Result<Option<App>> {
        if self.is_stale() {
            self.refresh().await?;
        }
        Ok(self.get_cached(dim_api_key))
    }

    /// Registers an app and invalidates the cache.
    ///
    /// # Errors
    ///
    /// Fails if the app id is already taken.
    pub async fn register_app(&self, app: &App) -> Result<()> {
        self.store.register_app(app).await?;
        self.invalidate();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use dim_sync_store::{InMemoryDocumentStore, StoreClient};
    use dim_sync_types::config::{ConflictRetryConfig, StoreConfig, TransferConfig};

    use super::*;

    fn cache(interval: Duration) -> (ProfileStore, AppCache) {
        let memory = Arc::new(InMemoryDocumentStore::new(&StoreConfig::default()));
        let client =
            StoreClient::new(memory, StoreConfig::default(), &ConflictRetryConfig::default());
        let store = ProfileStore::new(client, &TransferConfig::default());
        let config = AppCacheConfig::builder().refresh_interval(interval).build().expect("config");
        (store.clone(), AppCache::new(store, &config))
    }

    fn app(id: &str) -> App {
        App {
            id: id.into(),
            bungie_api_key: "bungie".into(),
            dim_api_key: Uuid::new_v4(),
            origin: "https://app.example".into(),
            created_at: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_refreshes_after_interval() {
        let (store, cache) = cache(Duration::from_secs(60));
        let first = app("dim");
        store.register_app(&first).await.expect("register");
        assert_eq!(cache.lookup(first.dim_api_key).await.expect("lookup").expect("found").id, "dim");

        // Registered behind the cache's back: invisible until the interval passes.
        let second = app("other");
        store.register_app(&second).await.expect("register");
        assert!(cache.lookup(second.dim_api_key).await.expect("lookup").is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.is_stale());
        assert!(cache.lookup(second.dim_api_key).await.expect("lookup").is_some());
    }

    #[tokio::test]
    async fn test_register_invalidates() {
        let (_, cache) = cache(Duration::from_secs(3600));
        cache.refresh().await.expect("refresh");
        assert!(!cache.is_stale());
        let registered = app("dim");
        cache.register_app(&registered).await.expect("register");
        assert!(cache.is_stale());
        assert!(cache.lookup(registered.dim_api_key).await.expect("lookup").is_some());
        assert!(cache.register_app(&registered).await.is_err(), "ids are never reused");
    }

    #[tokio::test]
    async fn test_instances_are_isolated() {
        let (_, a) = cache(Duration::from_secs(60));
        let (_, b) = cache(Duration::from_secs(60));
        let registered = app("dim");
        a.register_app(&registered).await.expect("register");
        assert!(b.lookup(registered.dim_api_key).await.expect("lookup").is_none());
    }
}
