//! Server status signal and the presentation-side monitor that follows it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::cache::lock;
use crate::events::{EventBus, EventName, Notification, SubscriptionId};

/// Reachability of the catalog backend as last observed by the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
  /// No fetch has completed yet
  #[default]
  Unknown,
  /// Last fetch succeeded
  Active,
  /// Last fetch failed, cached data is being served
  Hibernating,
  /// Last fetch failed with nothing cached to fall back on
  Error,
}

impl fmt::Display for ServerStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Unknown => "unknown",
      Self::Active => "active",
      Self::Hibernating => "hibernating",
      Self::Error => "error",
    };
    f.write_str(s)
  }
}

/// Process-wide server status. Every write is broadcast as
/// `serverStatusChanged`, even when the value is unchanged.
pub struct StatusSignal {
  current: RwLock<ServerStatus>,
  bus: Arc<EventBus>,
}

impl StatusSignal {
  pub fn new(bus: Arc<EventBus>) -> Self {
    Self {
      current: RwLock::new(ServerStatus::Unknown),
      bus,
    }
  }

  pub fn get(&self) -> ServerStatus {
    *lock::read(&self.current, "status.get")
  }

  /// Only the persistent cache writes the status.
  pub(crate) fn set(&self, status: ServerStatus) {
    let previous = std::mem::replace(&mut *lock::write(&self.current, "status.set"), status);
    if previous != status {
      info!(from = %previous, to = %status, "Server status changed");
    }
    self.bus.publish(Notification::ServerStatusChanged { status });
  }
}

/// What the status banner should say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
  pub status: ServerStatus,
  pub text: &'static str,
  pub sub_text: Option<&'static str>,
}

impl Banner {
  fn for_status(status: ServerStatus) -> Option<Self> {
    let (text, sub_text) = match status {
      ServerStatus::Hibernating => ("Server is starting up...", Some("Showing saved data")),
      ServerStatus::Error => ("No connection", Some("Showing saved data")),
      ServerStatus::Unknown => ("Checking server...", None),
      ServerStatus::Active => return None,
    };
    Some(Self {
      status,
      text,
      sub_text,
    })
  }
}

#[derive(Debug)]
struct MonitorState {
  status: ServerStatus,
  using_cache: bool,
  last_change: Instant,
}

/// Follows status and cache notifications on behalf of a view.
///
/// Unsubscribes from the bus when dropped.
pub struct StatusMonitor {
  bus: Arc<EventBus>,
  state: Arc<Mutex<MonitorState>>,
  subscriptions: Vec<SubscriptionId>,
  banner_for: Duration,
}

impl StatusMonitor {
  /// Start following `bus`, seeded with the status known right now.
  pub fn attach(bus: Arc<EventBus>, initial: ServerStatus, banner_for: Duration) -> Self {
    let state = Arc::new(Mutex::new(MonitorState {
      status: initial,
      using_cache: false,
      last_change: Instant::now(),
    }));

    let mut subscriptions = Vec::with_capacity(4);

    let s = Arc::clone(&state);
    subscriptions.push(bus.subscribe(EventName::ServerStatusChanged, move |n| {
      if let Notification::ServerStatusChanged { status } = n {
        let mut state = lock::mutex(&s, "monitor.status");
        match status {
          ServerStatus::Hibernating => info!("Server starting up, showing saved data"),
          ServerStatus::Active => {
            if state.status == ServerStatus::Hibernating {
              info!("Server active, data refreshed");
            }
            state.using_cache = false;
          }
          ServerStatus::Error => error!("Could not reach the server"),
          ServerStatus::Unknown => {}
        }
        state.status = *status;
        state.last_change = Instant::now();
      }
    }));

    let s = Arc::clone(&state);
    subscriptions.push(bus.subscribe(EventName::UsingCachedData, move |n| {
      if let Notification::UsingCachedData {
        message,
        cache_key,
        error,
      } = n
      {
        warn!(cache_key = %cache_key, error = %error, "{}", message);
        let mut state = lock::mutex(&s, "monitor.cached");
        state.using_cache = true;
        state.last_change = Instant::now();
      }
    }));

    for name in [
      EventName::FocacciaDataUpdated,
      EventName::FeaturedFocacciaDataUpdated,
    ] {
      let s = Arc::clone(&state);
      subscriptions.push(bus.subscribe(name, move |n| {
        let mut state = lock::mutex(&s, "monitor.updated");
        if state.using_cache {
          if let Notification::FocacciaDataUpdated { cache_key, .. }
          | Notification::FeaturedFocacciaDataUpdated { cache_key, .. } = n
          {
            info!(cache_key = %cache_key, "Data refreshed from the server");
          }
          state.using_cache = false;
        }
      }));
    }

    Self {
      bus,
      state,
      subscriptions,
      banner_for,
    }
  }

  pub fn server_status(&self) -> ServerStatus {
    lock::mutex(&self.state, "monitor.server_status").status
  }

  pub fn is_using_cache(&self) -> bool {
    lock::mutex(&self.state, "monitor.is_using_cache").using_cache
  }

  /// Banner to show, if any. It appears while the server is not active and
  /// hides itself `banner_for` after the last change.
  pub fn banner(&self) -> Option<Banner> {
    let state = lock::mutex(&self.state, "monitor.banner");
    if state.last_change.elapsed() >= self.banner_for {
      return None;
    }
    Banner::for_status(state.status)
  }

  pub fn is_server_active(&self) -> bool {
    self.server_status() == ServerStatus::Active
  }

  pub fn is_server_hibernating(&self) -> bool {
    self.server_status() == ServerStatus::Hibernating
  }

  pub fn has_server_error(&self) -> bool {
    self.server_status() == ServerStatus::Error
  }
}

impl Drop for StatusMonitor {
  fn drop(&mut self) {
    for id in self.subscriptions.drain(..) {
      self.bus.unsubscribe(id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::events::recorder;
  use serde_json::json;

  const LONG: Duration = Duration::from_secs(60);

  #[test]
  fn test_signal_starts_unknown_and_broadcasts_every_write() {
    let bus = Arc::new(EventBus::new());
    let seen = recorder(&bus);
    let signal = StatusSignal::new(Arc::clone(&bus));
    assert_eq!(signal.get(), ServerStatus::Unknown);

    signal.set(ServerStatus::Active);
    signal.set(ServerStatus::Active);

    assert_eq!(signal.get(), ServerStatus::Active);
    assert_eq!(
      *seen.lock().unwrap(),
      vec![
        Notification::ServerStatusChanged {
          status: ServerStatus::Active
        };
        2
      ]
    );
  }

  #[test]
  fn test_monitor_tracks_cache_usage() {
    let bus = Arc::new(EventBus::new());
    let signal = StatusSignal::new(Arc::clone(&bus));
    let monitor = StatusMonitor::attach(Arc::clone(&bus), signal.get(), LONG);

    signal.set(ServerStatus::Hibernating);
    bus.publish(Notification::UsingCachedData {
      message: "Showing saved data".to_string(),
      cache_key: "focaccias".to_string(),
      error: "timed out".to_string(),
    });
    assert!(monitor.is_server_hibernating());
    assert!(monitor.is_using_cache());

    bus.publish(Notification::FocacciaDataUpdated {
      data: json!([]),
      cache_key: "focaccias".to_string(),
    });
    assert!(!monitor.is_using_cache());

    bus.publish(Notification::UsingCachedData {
      message: "Showing saved data".to_string(),
      cache_key: "focaccias".to_string(),
      error: "timed out".to_string(),
    });
    signal.set(ServerStatus::Active);
    assert!(monitor.is_server_active());
    assert!(!monitor.is_using_cache());
  }

  #[test]
  fn test_banner_per_status() {
    let bus = Arc::new(EventBus::new());
    let signal = StatusSignal::new(Arc::clone(&bus));
    let monitor = StatusMonitor::attach(Arc::clone(&bus), signal.get(), LONG);

    assert_eq!(monitor.banner().map(|b| b.status), Some(ServerStatus::Unknown));

    signal.set(ServerStatus::Error);
    assert!(monitor.has_server_error());
    assert_eq!(monitor.banner().unwrap().text, "No connection");

    signal.set(ServerStatus::Active);
    assert_eq!(monitor.banner(), None);
  }

  #[test]
  fn test_banner_is_time_boxed() {
    let bus = Arc::new(EventBus::new());
    let signal = StatusSignal::new(Arc::clone(&bus));
    let monitor = StatusMonitor::attach(Arc::clone(&bus), signal.get(), Duration::ZERO);

    signal.set(ServerStatus::Hibernating);
    assert_eq!(monitor.banner(), None);
  }

  #[test]
  fn test_drop_unsubscribes() {
    let bus = Arc::new(EventBus::new());
    let monitor = StatusMonitor::attach(Arc::clone(&bus), ServerStatus::Unknown, LONG);
    assert_eq!(bus.listener_count(), 4);
    drop(monitor);
    assert_eq!(bus.listener_count(), 0);
  }
}
