//! Core types for the caching system.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Schema version of the entry format. Bump it to invalidate every stored
/// entry on the next read.
pub const CACHE_VERSION: u32 = 1;

/// Number of hex characters kept from the content digest.
const HASH_LEN: usize = 16;

/// A cached payload plus the metadata needed for freshness and change checks.
///
/// Entries are never mutated; a refresh builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  /// Creation time, epoch milliseconds
  pub timestamp: i64,
  /// Short digest of `data`, for equality only
  pub hash: String,
  pub version: u32,
}

impl<T: Serialize> CacheEntry<T> {
  /// Build an entry stamped with the current time and engine version.
  pub fn new(data: T) -> Result<Self> {
    let hash = content_hash(&data)?;
    Ok(Self {
      data,
      timestamp: now_millis(),
      hash,
      version: CACHE_VERSION,
    })
  }
}

impl<T> CacheEntry<T> {
  /// Fresh iff `now - timestamp < ttl`.
  pub fn is_fresh(&self, ttl: Duration) -> bool {
    now_millis() - self.timestamp < ttl.num_milliseconds()
  }

  /// Same payload with a new timestamp.
  pub fn restamped(mut self) -> Self {
    self.timestamp = now_millis();
    self
  }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Short SHA-256 digest of the JSON form of `data`.
///
/// The payload goes through `serde_json::Value` with sorted object keys so a
/// typed struct and the same data read back from storage hash identically.
pub fn content_hash<T: Serialize + ?Sized>(data: &T) -> Result<String> {
  let value =
    serde_json::to_value(data).map_err(|e| eyre!("Failed to serialize cache payload: {}", e))?;
  let value = canonicalize(value);
  let bytes =
    serde_json::to_vec(&value).map_err(|e| eyre!("Failed to serialize cache payload: {}", e))?;

  let mut hasher = Sha256::new();
  hasher.update(&bytes);
  let mut digest = hex::encode(hasher.finalize());
  digest.truncate(HASH_LEN);
  Ok(digest)
}

fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(String, Value)> = map.into_iter().collect();
      entries.sort_by(|a, b| a.0.cmp(&b.0));
      Value::Object(
        entries
          .into_iter()
          .map(|(k, v)| (k, canonicalize(v)))
          .collect::<Map<String, Value>>(),
      )
    }
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    other => other,
  }
}

/// Result of a catalog read, tagged with where the data came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResult<T> {
  /// Data from the network or from a fresh cache entry
  Fresh { data: T, source: CacheSource },
  /// Network unavailable, serving a stale or fallback copy
  Stale { data: T, reason: String },
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self::Fresh {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self::Fresh {
      data,
      source: CacheSource::Cache,
    }
  }

  pub fn stale(data: T, reason: impl Into<String>) -> Self {
    Self::Stale {
      data,
      reason: reason.into(),
    }
  }

  pub fn data(&self) -> &T {
    match self {
      Self::Fresh { data, .. } | Self::Stale { data, .. } => data,
    }
  }

  /// True when the payload was served from the cache after a network failure.
  pub fn is_stale(&self) -> bool {
    matches!(self, Self::Stale { .. })
  }
}

/// Where fresh data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the network just now
  Network,
  /// Served from a cache entry still within its TTL
  Cache,
}
