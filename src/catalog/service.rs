//! Catalog access with transparent caching, stale-while-revalidate and an
//! offline fallback path.

use color_eyre::{eyre::eyre, Report, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cache::lock;
use crate::cache::{CacheInfo, CacheResult, CacheSource, CatalogKey, PersistentCache, BATCH_PREFIX};
use crate::events::{EventBus, Notification};
use crate::status::ServerStatus;

use super::client::CatalogApi;
use super::types::{ApiResponse, CatalogList, Focaccia, FocacciaCreate};

const CACHED_DATA_MESSAGE: &str = "Server is starting up, showing saved data";

/// Catalog client with transparent caching support.
///
/// Reads go cache first, then network, then any stale or fallback copy.
/// Writes go straight to the network and invalidate what they touch.
#[derive(Clone)]
pub struct CatalogService {
  api: Arc<dyn CatalogApi>,
  cache: Arc<PersistentCache>,
  bus: Arc<EventBus>,
  timeout: Duration,
  /// Background revalidations still in flight
  tasks: Arc<Mutex<JoinSet<()>>>,
}

impl CatalogService {
  pub fn new(api: Arc<dyn CatalogApi>, cache: Arc<PersistentCache>, bus: Arc<EventBus>) -> Self {
    Self {
      api,
      cache,
      bus,
      timeout: Duration::from_secs(10),
      tasks: Arc::new(Mutex::new(JoinSet::new())),
    }
  }

  /// Set the timeout for foreground fetches.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  #[cfg(test)]
  pub fn cache(&self) -> &Arc<PersistentCache> {
    &self.cache
  }

  /// Full catalog list.
  pub async fn list(&self) -> Result<CacheResult<CatalogList>> {
    self
      .read(CatalogKey::All, || {
        let api = Arc::clone(&self.api);
        async move { api.list().await }
      })
      .await
  }

  /// Featured subset.
  pub async fn list_featured(&self) -> Result<CacheResult<CatalogList>> {
    self
      .read(CatalogKey::Featured, || {
        let api = Arc::clone(&self.api);
        async move { api.list_featured().await }
      })
      .await
  }

  /// First `limit` items, cached per distinct limit. A fetch without a limit
  /// also warms the full-list key.
  pub async fn list_batch(&self, limit: Option<usize>) -> Result<CacheResult<CatalogList>> {
    let result = self
      .read(CatalogKey::Batch(limit), || {
        let api = Arc::clone(&self.api);
        async move { api.list_batch(limit).await }
      })
      .await?;

    if limit.is_none() {
      if let CacheResult::Fresh {
        data,
        source: CacheSource::Network,
      } = &result
      {
        self.cache.set(&CatalogKey::All.to_string(), data);
      }
    }

    Ok(result)
  }

  /// Single item by id.
  pub async fn get_by_id(&self, id: u64) -> Result<CacheResult<ApiResponse<Focaccia>>> {
    self
      .read(CatalogKey::Item(id), || {
        let api = Arc::clone(&self.api);
        async move { api.get_by_id(id).await }
      })
      .await
  }

  pub async fn create(&self, item: &FocacciaCreate) -> Result<ApiResponse<Focaccia>> {
    let created = self.bounded(self.api.create(item)).await?;
    self.invalidate(None);
    info!(id = created.data.id, "Created catalog item");
    Ok(created)
  }

  pub async fn update(&self, id: u64, item: &Focaccia) -> Result<ApiResponse<Focaccia>> {
    let updated = self.bounded(self.api.update(id, item)).await?;
    self.invalidate(Some(id));
    info!(id, "Updated catalog item");
    Ok(updated)
  }

  pub async fn delete(&self, id: u64) -> Result<ApiResponse<Value>> {
    let deleted = self.bounded(self.api.delete(id)).await?;
    self.invalidate(Some(id));
    info!(id, "Deleted catalog item");
    Ok(deleted)
  }

  pub fn server_status(&self) -> ServerStatus {
    self.cache.server_status()
  }

  pub fn cache_info(&self) -> CacheInfo {
    self.cache.info()
  }

  /// Drop the primary cache and refetch the list and featured resources.
  pub async fn force_refresh(&self) -> Result<()> {
    self.cache.clear();
    futures::try_join!(self.list(), self.list_featured())?;
    Ok(())
  }

  /// Wipe the fallback mirror only.
  pub fn clear_fallback_cache(&self) {
    self.cache.clear_fallback();
  }

  /// Wipe memory and durable tiers, keeping the fallback mirror.
  pub fn clear_cache(&self) {
    self.cache.clear();
  }

  /// Cache-first read.
  ///
  /// 1. Fresh cache hit: return it, revalidate list resources in the background
  /// 2. Otherwise fetch from the network, bounded by the timeout
  /// 3. On failure serve any stale or fallback copy, else propagate the error
  async fn read<T, F, Fut>(&self, key: CatalogKey, fetcher: F) -> Result<CacheResult<T>>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let cache_key = key.to_string();

    if let Some(cached) = self.cache.get::<T>(&cache_key) {
      if key.revalidates() {
        self.spawn_revalidation(key);
      }
      self.cache.set_server_status(ServerStatus::Active);
      return Ok(CacheResult::from_cache(cached));
    }

    match self.bounded(fetcher()).await {
      Ok(data) => {
        self.cache.set(&cache_key, &data);
        self.cache.set_server_status(ServerStatus::Active);
        Ok(CacheResult::from_network(data))
      }
      Err(e) => self.fall_back(&cache_key, e),
    }
  }

  fn fall_back<T: DeserializeOwned>(&self, cache_key: &str, err: Report) -> Result<CacheResult<T>> {
    let Some(data) = self.cache.get_stale::<T>(cache_key) else {
      error!(cache_key = %cache_key, error = %err, "Fetch failed with nothing cached");
      self.cache.set_server_status(ServerStatus::Error);
      return Err(err);
    };

    let reason = err.to_string();
    warn!(cache_key = %cache_key, error = %reason, "Fetch failed, serving cached data");
    self.cache.set_server_status(ServerStatus::Hibernating);
    self.bus.publish(Notification::UsingCachedData {
      message: CACHED_DATA_MESSAGE.to_string(),
      cache_key: cache_key.to_string(),
      error: reason.clone(),
    });

    Ok(CacheResult::stale(data, reason))
  }

  async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(self.timeout, fut)
      .await
      .map_err(|_| eyre!("Request timed out after {}ms", self.timeout.as_millis()))?
  }

  /// Wait up to `max` for background revalidations to finish. Whatever is
  /// still running after that is aborted.
  pub async fn settle(&self, max: Duration) {
    let mut tasks = std::mem::take(&mut *lock::mutex(&self.tasks, "settle"));
    let pending = tasks.len();
    if pending == 0 {
      return;
    }

    let drain = async {
      while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
          warn!(error = %e, "Background revalidation task failed");
        }
      }
    };
    if tokio::time::timeout(max, drain).await.is_err() {
      warn!(pending = tasks.len(), "Abandoning unfinished background revalidation");
    } else {
      debug!(pending, "Background revalidation settled");
    }
  }

  /// Refresh in the background. The task outlives the caller and still
  /// updates the cache if nobody is listening any more; `settle` waits for it.
  fn spawn_revalidation(&self, key: CatalogKey) {
    let service = self.clone();
    let mut tasks = lock::mutex(&self.tasks, "spawn_revalidation");
    while tasks.try_join_next().is_some() {}
    tasks.spawn(async move {
      service.revalidate(key).await;
    });
  }

  async fn revalidate(&self, key: CatalogKey) {
    let fetched = match key {
      CatalogKey::All => self.bounded(self.api.list()).await,
      CatalogKey::Featured => self.bounded(self.api.list_featured()).await,
      _ => return,
    };

    let cache_key = key.to_string();
    let fresh = match fetched {
      Ok(fresh) => fresh,
      Err(e) => {
        debug!(cache_key = %cache_key, error = %e, "Background revalidation failed");
        return;
      }
    };

    if !self.cache.has_changed(&cache_key, &fresh) {
      debug!(cache_key = %cache_key, "Background revalidation found no changes");
      return;
    }

    self.cache.set(&cache_key, &fresh);
    let data = match serde_json::to_value(&fresh) {
      Ok(data) => data,
      Err(e) => {
        warn!(cache_key = %cache_key, error = %e, "Could not encode refreshed data");
        return;
      }
    };

    info!(cache_key = %cache_key, "Catalog data updated in background");
    let notification = match key {
      CatalogKey::Featured => Notification::FeaturedFocacciaDataUpdated { data, cache_key },
      _ => Notification::FocacciaDataUpdated { data, cache_key },
    };
    self.bus.publish(notification);
  }

  /// Over-invalidate: every list key, plus the item key when given.
  fn invalidate(&self, id: Option<u64>) {
    self.cache.delete(&CatalogKey::All.to_string());
    self.cache.delete(&CatalogKey::Featured.to_string());
    self.cache.delete_prefix(BATCH_PREFIX);
    if let Some(id) = id {
      self.cache.delete(&CatalogKey::Item(id).to_string());
    }
    debug!(?id, "Invalidated catalog cache");
  }
}
