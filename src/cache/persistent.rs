//! Two-tier persistent cache: an in-memory map in front of the durable
//! entry store, with a TTL-agnostic fallback mirror behind both.

use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use super::entry_store::EntryStore;
use super::lock;
use super::storage::KeyValueStorage;
use super::traits::{content_hash, CacheEntry};
use crate::events::EventBus;
use crate::status::{ServerStatus, StatusSignal};

/// Default freshness window.
pub const DEFAULT_TTL_MINUTES: i64 = 15;

/// Snapshot of the cache for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
  /// Keys held in memory, sorted
  pub keys: Vec<String>,
  pub memory_size: usize,
  pub storage_size: usize,
  pub fallback_size: usize,
  pub server_status: ServerStatus,
}

/// Read-through cache keyed by logical resource name.
///
/// One instance is shared (`Arc<PersistentCache>`) for the whole process.
/// It owns the memory tier and the server status; persistence is delegated
/// to the primary and fallback entry stores.
pub struct PersistentCache {
  memory: RwLock<HashMap<String, CacheEntry<Value>>>,
  primary: EntryStore,
  fallback: EntryStore,
  ttl: Duration,
  status: StatusSignal,
}

impl PersistentCache {
  pub fn new(storage: Arc<dyn KeyValueStorage>, bus: Arc<EventBus>) -> Self {
    Self {
      memory: RwLock::new(HashMap::new()),
      primary: EntryStore::primary(Arc::clone(&storage)),
      fallback: EntryStore::fallback(storage),
      ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
      status: StatusSignal::new(bus),
    }
  }

  /// Set how long entries stay fresh.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Fresh payload from memory or durable storage. A durable hit is promoted
  /// into memory.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let in_memory = lock::read(&self.memory, "get").get(key).cloned();
    if let Some(entry) = in_memory {
      if entry.is_fresh(self.ttl) {
        debug!(cache_key = %key, tier = "memory", "Cache hit");
        return decode(key, entry.data);
      }
    }

    // Read storage under the memory lock so a concurrent `set` can't be
    // overwritten by the older durable copy.
    let mut memory = lock::write(&self.memory, "get.promote");
    let entry = self.primary.read(key)?;
    if !entry.is_fresh(self.ttl) {
      debug!(cache_key = %key, "Cache entry expired");
      return None;
    }

    debug!(cache_key = %key, tier = "storage", "Cache hit, promoting to memory");
    memory.insert(key.to_string(), entry.clone());
    drop(memory);
    decode(key, entry.data)
  }

  /// Any copy at all, fresh or not: memory, then durable storage, then the
  /// fallback mirror.
  pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let in_memory = lock::read(&self.memory, "get_stale").get(key).cloned();
    let entry = in_memory
      .or_else(|| self.primary.read(key))
      .or_else(|| {
        let entry = self.fallback.read(key);
        if entry.is_some() {
          debug!(cache_key = %key, tier = "fallback", "Serving fallback copy");
        }
        entry
      })?;
    decode(key, entry.data)
  }

  /// Replace the entry for `key` in every tier.
  ///
  /// The memory write lock is held across the durable writes so concurrent
  /// writers land in the same order in every tier.
  /// Best-effort: a payload that cannot be serialized is logged and skipped.
  pub fn set<T: Serialize>(&self, key: &str, data: &T) {
    let entry = match serde_json::to_value(data)
      .map_err(|e| e.to_string())
      .and_then(|value| CacheEntry::new(value).map_err(|e| e.to_string()))
    {
      Ok(entry) => entry,
      Err(e) => {
        warn!(cache_key = %key, error = %e, "Skipping cache write");
        return;
      }
    };

    debug!(cache_key = %key, hash = %entry.hash, "Cache set");
    let mut memory = lock::write(&self.memory, "set");
    self.primary.write(key, &entry);
    self.fallback.write(key, &entry.clone().restamped());
    memory.insert(key.to_string(), entry);
  }

  /// True when nothing is cached for `key` or `new_data` hashes differently
  /// from what is.
  pub fn has_changed<T: Serialize>(&self, key: &str, new_data: &T) -> bool {
    let in_memory = lock::read(&self.memory, "has_changed")
      .get(key)
      .map(|e| e.hash.clone());
    let Some(current) = in_memory.or_else(|| self.primary.read(key).map(|e| e.hash)) else {
      return true;
    };

    match content_hash(new_data) {
      Ok(hash) => hash != current,
      Err(e) => {
        warn!(cache_key = %key, error = %e, "Could not hash new data, treating as changed");
        true
      }
    }
  }

  /// Drop `key` from memory and durable storage. The fallback copy stays.
  pub fn delete(&self, key: &str) {
    let mut memory = lock::write(&self.memory, "delete");
    memory.remove(key);
    self.primary.remove(key);
  }

  /// Drop every key starting with `prefix` from memory and durable storage.
  pub fn delete_prefix(&self, prefix: &str) {
    let mut memory = lock::write(&self.memory, "delete_prefix");
    memory.retain(|k, _| !k.starts_with(prefix));
    for key in self.primary.keys() {
      if key.starts_with(prefix) {
        self.primary.remove(&key);
      }
    }
  }

  /// Empty memory and durable storage. The fallback mirror survives.
  pub fn clear(&self) {
    let mut memory = lock::write(&self.memory, "clear");
    memory.clear();
    self.primary.remove_all();
    debug!("Cache cleared");
  }

  /// Wipe the fallback mirror only.
  pub fn clear_fallback(&self) {
    self.fallback.remove_all();
    debug!("Fallback cache cleared");
  }

  pub fn server_status(&self) -> ServerStatus {
    self.status.get()
  }

  pub fn set_server_status(&self, status: ServerStatus) {
    self.status.set(status);
  }

  pub fn info(&self) -> CacheInfo {
    let mut keys: Vec<String> = lock::read(&self.memory, "info").keys().cloned().collect();
    keys.sort();

    CacheInfo {
      memory_size: keys.len(),
      keys,
      storage_size: self.primary.keys().len(),
      fallback_size: self.fallback.keys().len(),
      server_status: self.server_status(),
    }
  }
}

fn decode<T: DeserializeOwned>(key: &str, data: Value) -> Option<T> {
  serde_json::from_value(data)
    .map_err(|e| debug!(cache_key = %key, error = %e, "Cached payload has unexpected shape"))
    .ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::traits::now_millis;
  use crate::events::{recorder, Notification};
  use serde_json::json;

  fn cache_with(storage: Arc<dyn KeyValueStorage>) -> PersistentCache {
    PersistentCache::new(storage, Arc::new(EventBus::new()))
  }

  fn cache() -> (Arc<dyn KeyValueStorage>, PersistentCache) {
    let storage: Arc<dyn KeyValueStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    (Arc::clone(&storage), cache_with(storage))
  }

  #[test]
  fn test_set_then_get_round_trips() {
    let (_, cache) = cache();
    let payload = json!({"data": [{"id": 1, "name": "Clásica"}], "message": "ok", "success": true});
    cache.set("focaccias", &payload);
    assert_eq!(cache.get::<Value>("focaccias"), Some(payload));
  }

  #[test]
  fn test_expired_entry_only_available_stale() {
    let (storage, _) = cache();
    let cache = cache_with(storage).with_ttl(Duration::zero());
    cache.set("focaccias", &vec![1, 2, 3]);

    assert_eq!(cache.get::<Vec<u32>>("focaccias"), None);
    assert_eq!(cache.get_stale::<Vec<u32>>("focaccias"), Some(vec![1, 2, 3]));
  }

  #[test]
  fn test_durable_hit_is_promoted() {
    let (storage, first) = cache();
    first.set("featuredFocaccias", &"featured");

    // A new engine over the same storage starts with an empty memory tier.
    let second = cache_with(storage);
    assert!(second.info().keys.is_empty());
    assert_eq!(second.get::<String>("featuredFocaccias").as_deref(), Some("featured"));
    assert_eq!(second.info().keys, vec!["featuredFocaccias".to_string()]);
  }

  #[test]
  fn test_expired_durable_entry_is_not_fresh() {
    let (storage, _) = cache();
    let primary = EntryStore::primary(Arc::clone(&storage));
    let mut entry = CacheEntry::new(json!("old")).unwrap();
    entry.timestamp = now_millis() - Duration::minutes(DEFAULT_TTL_MINUTES + 1).num_milliseconds();
    primary.write("focaccias", &entry);

    let cache = cache_with(storage);
    assert_eq!(cache.get::<String>("focaccias"), None);
    assert_eq!(cache.get_stale::<String>("focaccias").as_deref(), Some("old"));
  }

  #[test]
  fn test_concurrent_sets_agree_across_tiers() {
    let (storage, cache) = cache();
    let cache = Arc::new(cache);

    for round in 0..50 {
      let barrier = Arc::new(std::sync::Barrier::new(2));
      let writers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|writer| {
          let cache = Arc::clone(&cache);
          let barrier = Arc::clone(&barrier);
          std::thread::spawn(move || {
            barrier.wait();
            cache.set("focaccias", &json!({"round": round, "writer": writer}));
          })
        })
        .collect();
      for writer in writers {
        writer.join().unwrap();
      }

      let in_memory = lock::read(&cache.memory, "test").get("focaccias").cloned().unwrap();
      let durable = cache.primary.read("focaccias").unwrap();
      let fallback = EntryStore::fallback(Arc::clone(&storage)).read("focaccias").unwrap();
      assert_eq!(in_memory.hash, durable.hash, "round {}", round);
      assert_eq!(in_memory.hash, fallback.hash, "round {}", round);
    }
  }

  #[test]
  fn test_has_changed() {
    let (_, cache) = cache();
    assert!(cache.has_changed("focaccias", &json!([1])));

    cache.set("focaccias", &json!([1]));
    assert!(!cache.has_changed("focaccias", &json!([1])));
    assert!(cache.has_changed("focaccias", &json!([1, 2])));
  }

  #[test]
  fn test_clear_keeps_fallback() {
    let (_, cache) = cache();
    cache.set("focaccias", &"list");
    cache.set("focaccia_5", &"item");

    cache.clear();

    let info = cache.info();
    assert_eq!(info.memory_size, 0);
    assert_eq!(info.storage_size, 0);
    assert_eq!(info.fallback_size, 2);
    assert_eq!(cache.get::<String>("focaccias"), None);
    assert_eq!(cache.get_stale::<String>("focaccias").as_deref(), Some("list"));

    cache.clear_fallback();
    assert_eq!(cache.get_stale::<String>("focaccias"), None);
  }

  #[test]
  fn test_delete_and_delete_prefix() {
    let (_, cache) = cache();
    cache.set("focaccias_batch_4", &1);
    cache.set("focaccias_batch_8", &2);
    cache.set("focaccia_5", &3);

    cache.delete("focaccia_5");
    cache.delete_prefix("focaccias_batch_");

    let info = cache.info();
    assert!(info.keys.is_empty());
    assert_eq!(info.storage_size, 0);
    assert_eq!(info.fallback_size, 3);
  }

  #[test]
  fn test_wrong_shape_reads_as_absent() {
    let (_, cache) = cache();
    cache.set("focaccias", &json!({"not": "a list"}));
    assert_eq!(cache.get::<Vec<u32>>("focaccias"), None);
  }

  #[test]
  fn test_server_status_writes_are_broadcast() {
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let cache = PersistentCache::new(Arc::new(SqliteStorage::open_in_memory().unwrap()), bus);

    assert_eq!(cache.server_status(), ServerStatus::Unknown);
    cache.set_server_status(ServerStatus::Hibernating);

    assert_eq!(cache.info().server_status, ServerStatus::Hibernating);
    assert_eq!(
      *seen.lock().unwrap(),
      vec![Notification::ServerStatusChanged {
        status: ServerStatus::Hibernating
      }]
    );
  }

  #[test]
  fn test_memory_tier_serves_without_storage() {
    let cache = cache_with(Arc::new(crate::cache::storage::NoopStorage));
    cache.set("focaccias", &vec!["a".to_string()]);
    assert_eq!(cache.get::<Vec<String>>("focaccias"), Some(vec!["a".to_string()]));
    assert_eq!(cache.info().storage_size, 0);
  }
}
