//! Change notification channel.
//!
//! The cache and the catalog service publish named events here; presentation
//! code subscribes to re-render without polling. Delivery is synchronous:
//! every matching listener has run by the time `publish` returns.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::cache::lock;
use crate::status::ServerStatus;

/// Names under which notifications are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
  ServerStatusChanged,
  UsingCachedData,
  FocacciaDataUpdated,
  FeaturedFocacciaDataUpdated,
}

impl EventName {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::ServerStatusChanged => "serverStatusChanged",
      Self::UsingCachedData => "usingCachedData",
      Self::FocacciaDataUpdated => "focacciaDataUpdated",
      Self::FeaturedFocacciaDataUpdated => "featuredFocacciaDataUpdated",
    }
  }
}

impl fmt::Display for EventName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A published event and its payload.
///
/// Serializes as `{"event": <name>, "detail": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "detail", rename_all = "camelCase")]
pub enum Notification {
  ServerStatusChanged {
    status: ServerStatus,
  },
  UsingCachedData {
    message: String,
    #[serde(rename = "cacheKey")]
    cache_key: String,
    error: String,
  },
  FocacciaDataUpdated {
    data: Value,
    #[serde(rename = "cacheKey")]
    cache_key: String,
  },
  FeaturedFocacciaDataUpdated {
    data: Value,
    #[serde(rename = "cacheKey")]
    cache_key: String,
  },
}

impl Notification {
  pub fn name(&self) -> EventName {
    match self {
      Self::ServerStatusChanged { .. } => EventName::ServerStatusChanged,
      Self::UsingCachedData { .. } => EventName::UsingCachedData,
      Self::FocacciaDataUpdated { .. } => EventName::FocacciaDataUpdated,
      Self::FeaturedFocacciaDataUpdated { .. } => EventName::FeaturedFocacciaDataUpdated,
    }
  }
}

pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
  id: SubscriptionId,
  /// `None` receives every event
  filter: Option<EventName>,
  listener: Listener,
}

/// Publish/subscribe bus keyed by event name.
///
/// Shared by reference (`Arc<EventBus>`) between the cache, the catalog
/// service and whatever renders their output.
#[derive(Default)]
pub struct EventBus {
  subscriptions: RwLock<Vec<Subscription>>,
  next_id: AtomicU64,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `listener` for events named `name`.
  pub fn subscribe<F>(&self, name: EventName, listener: F) -> SubscriptionId
  where
    F: Fn(&Notification) + Send + Sync + 'static,
  {
    self.add(Some(name), Arc::new(listener))
  }

  /// Register `listener` for every event.
  pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
  where
    F: Fn(&Notification) + Send + Sync + 'static,
  {
    self.add(None, Arc::new(listener))
  }

  fn add(&self, filter: Option<EventName>, listener: Listener) -> SubscriptionId {
    let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
    lock::write(&self.subscriptions, "subscribe").push(Subscription {
      id,
      filter,
      listener,
    });
    id
  }

  /// Returns false if the subscription was already gone.
  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut subs = lock::write(&self.subscriptions, "unsubscribe");
    let before = subs.len();
    subs.retain(|s| s.id != id);
    subs.len() != before
  }

  /// Deliver `notification` to every matching listener before returning.
  pub fn publish(&self, notification: Notification) {
    let name = notification.name();

    // Listeners run without the lock held so they may subscribe or publish.
    let listeners: Vec<Listener> = lock::read(&self.subscriptions, "publish")
      .iter()
      .filter(|s| s.filter.map_or(true, |f| f == name))
      .map(|s| Arc::clone(&s.listener))
      .collect();

    debug!(event = %name, listeners = listeners.len(), "Publishing notification");

    for listener in listeners {
      listener(&notification);
    }
  }

  #[cfg(test)]
  pub fn listener_count(&self) -> usize {
    lock::read(&self.subscriptions, "listener_count").len()
  }
}

/// Subscribe a listener that records every notification, for assertions.
#[cfg(test)]
pub(crate) fn recorder(bus: &EventBus) -> Arc<std::sync::Mutex<Vec<Notification>>> {
  let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
  let sink = Arc::clone(&seen);
  bus.subscribe_all(move |n| sink.lock().unwrap().push(n.clone()));
  seen
}
