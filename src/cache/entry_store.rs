//! Namespaced entry stores on top of the durable key/value storage.
//!
//! Two stores share one backend: the primary store backs the durable cache
//! tier, the fallback store is a TTL-agnostic mirror kept as a safety net for
//! when the primary entry has aged out and the network is down. Both are
//! best-effort: write failures are logged and swallowed, unreadable entries
//! read as absent.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::KeyValueStorage;
use super::traits::{CacheEntry, CACHE_VERSION};

pub const PRIMARY_PREFIX: &str = "focaccia_cache_";
pub const FALLBACK_PREFIX: &str = "focaccia_fallback_";

/// Cache entries persisted under a fixed key prefix.
#[derive(Clone)]
pub struct EntryStore {
  storage: Arc<dyn KeyValueStorage>,
  prefix: &'static str,
}

impl EntryStore {
  /// Store backing the durable cache tier.
  pub fn primary(storage: Arc<dyn KeyValueStorage>) -> Self {
    Self {
      storage,
      prefix: PRIMARY_PREFIX,
    }
  }

  /// Safety-net mirror read only after the other tiers miss.
  pub fn fallback(storage: Arc<dyn KeyValueStorage>) -> Self {
    Self {
      storage,
      prefix: FALLBACK_PREFIX,
    }
  }

  fn storage_key(&self, key: &str) -> String {
    format!("{}{}", self.prefix, key)
  }

  pub fn write(&self, key: &str, entry: &CacheEntry<Value>) {
    let text = match serde_json::to_string(entry) {
      Ok(text) => text,
      Err(e) => {
        warn!(cache_key = %key, store = self.prefix, error = %e, "Failed to serialize cache entry");
        return;
      }
    };

    if let Err(e) = self.storage.set_item(&self.storage_key(key), &text) {
      warn!(cache_key = %key, store = self.prefix, error = %e, "Failed to persist cache entry");
    }
  }

  /// Absent when missing, unreadable, or written by another engine version.
  pub fn read(&self, key: &str) -> Option<CacheEntry<Value>> {
    let text = match self.storage.get_item(&self.storage_key(key)) {
      Ok(Some(text)) => text,
      Ok(None) => return None,
      Err(e) => {
        warn!(cache_key = %key, store = self.prefix, error = %e, "Failed to read cache entry");
        return None;
      }
    };

    let entry: CacheEntry<Value> = match serde_json::from_str(&text) {
      Ok(entry) => entry,
      Err(e) => {
        debug!(cache_key = %key, store = self.prefix, error = %e, "Ignoring corrupt cache entry");
        return None;
      }
    };

    if entry.version != CACHE_VERSION {
      debug!(
        cache_key = %key,
        store = self.prefix,
        found = entry.version,
        expected = CACHE_VERSION,
        "Ignoring cache entry from another version"
      );
      return None;
    }

    Some(entry)
  }

  pub fn remove(&self, key: &str) {
    if let Err(e) = self.storage.remove_item(&self.storage_key(key)) {
      warn!(cache_key = %key, store = self.prefix, error = %e, "Failed to remove cache entry");
    }
  }

  /// Remove every entry under this store's prefix and nothing else.
  pub fn remove_all(&self) {
    for key in self.raw_keys() {
      if let Err(e) = self.storage.remove_item(&key) {
        warn!(storage_key = %key, error = %e, "Failed to remove cache entry");
      }
    }
  }

  /// Logical keys currently stored, prefix stripped.
  pub fn keys(&self) -> Vec<String> {
    self
      .raw_keys()
      .into_iter()
      .filter_map(|k| k.strip_prefix(self.prefix).map(String::from))
      .collect()
  }

  fn raw_keys(&self) -> Vec<String> {
    self
      .storage
      .keys_with_prefix(self.prefix)
      .unwrap_or_else(|e| {
        warn!(store = self.prefix, error = %e, "Failed to list cache entries");
        Vec::new()
      })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use color_eyre::{eyre::eyre, Result};
  use serde_json::json;

  fn stores() -> (Arc<dyn KeyValueStorage>, EntryStore, EntryStore) {
    let storage: Arc<dyn KeyValueStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let primary = EntryStore::primary(Arc::clone(&storage));
    let fallback = EntryStore::fallback(Arc::clone(&storage));
    (storage, primary, fallback)
  }

  /// Backend whose writes always fail, like a full quota.
  struct FullStorage;

  impl KeyValueStorage for FullStorage {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
      Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
      Err(eyre!("quota exceeded"))
    }

    fn remove_item(&self, _key: &str) -> Result<()> {
      Ok(())
    }

    fn keys_with_prefix(&self, _prefix: &str) -> Result<Vec<String>> {
      Err(eyre!("unavailable"))
    }
  }

  #[test]
  fn test_write_then_read() {
    let (storage, primary, _) = stores();
    let entry = CacheEntry::new(json!({"data": [1, 2]})).unwrap();
    primary.write("focaccias", &entry);

    assert_eq!(primary.read("focaccias"), Some(entry));
    assert!(storage
      .get_item("focaccia_cache_focaccias")
      .unwrap()
      .is_some());
  }

  #[test]
  fn test_namespaces_are_independent() {
    let (_, primary, fallback) = stores();
    let entry = CacheEntry::new(json!(1)).unwrap();
    primary.write("k", &entry);

    assert!(fallback.read("k").is_none());
    fallback.write("k", &entry);
    primary.remove("k");
    assert!(primary.read("k").is_none());
    assert!(fallback.read("k").is_some());
  }

  #[test]
  fn test_corrupt_entry_reads_as_absent() {
    let (storage, primary, _) = stores();
    storage.set_item("focaccia_cache_bad", "{not json").unwrap();
    assert!(primary.read("bad").is_none());
  }

  #[test]
  fn test_version_mismatch_reads_as_absent() {
    let (_, primary, _) = stores();
    let mut entry = CacheEntry::new(json!("old shape")).unwrap();
    entry.version = CACHE_VERSION + 1;
    primary.write("k", &entry);
    assert!(primary.read("k").is_none());
  }

  #[test]
  fn test_remove_all_leaves_foreign_keys() {
    let (storage, primary, fallback) = stores();
    let entry = CacheEntry::new(json!(true)).unwrap();
    primary.write("a", &entry);
    primary.write("b", &entry);
    fallback.write("a", &entry);
    storage.set_item("cart", "[]").unwrap();

    primary.remove_all();

    assert!(primary.keys().is_empty());
    assert_eq!(fallback.keys(), vec!["a".to_string()]);
    assert_eq!(storage.get_item("cart").unwrap().as_deref(), Some("[]"));
  }

  #[test]
  fn test_storage_failures_are_swallowed() {
    let store = EntryStore::primary(Arc::new(FullStorage));
    store.write("k", &CacheEntry::new(json!(1)).unwrap());
    assert!(store.read("k").is_none());
    assert!(store.keys().is_empty());
    store.remove_all();
  }
}
