//! Lock helpers that recover from poisoning instead of panicking.
//!
//! A panic in one task must not take the cache down for the rest of the
//! session, so a poisoned guard is logged and reused.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

pub(crate) fn read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
  lock.read().unwrap_or_else(|poisoned| {
    warn!(op, lock_kind = "rwlock.read", "Recovered from poisoned cache lock");
    poisoned.into_inner()
  })
}

pub(crate) fn write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
  lock.write().unwrap_or_else(|poisoned| {
    warn!(op, lock_kind = "rwlock.write", "Recovered from poisoned cache lock");
    poisoned.into_inner()
  })
}

pub(crate) fn mutex<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
  lock.lock().unwrap_or_else(|poisoned| {
    warn!(op, lock_kind = "mutex", "Recovered from poisoned cache lock");
    poisoned.into_inner()
  })
}
