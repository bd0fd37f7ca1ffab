//! Cross-process event bridge.
//!
//! The broadcast facility carries no payload: publishing an event bumps a
//! per-event counter file in the shared directory, and every bridge runs a
//! small poller thread that fires callbacks when it sees a counter move.
//! Delivery is at-most-once per observation, unordered across distinct
//! events, and a burst of the same event coalesces into a single callback.
//! Subscribers must re-read authoritative state (asset store / key-value
//! namespace) on receipt; delivery count is not a contract. Anything an
//! event needs to say is written to the shared stores *before* the publish.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::store::{KeyValueStore, StoreError};

/// The closed set of cross-process events. Wire names are versioned so the
/// namespace can evolve without confusing an older peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    OverlayChanged,
    StartStream,
    StopStream,
    DeviceChanged,
    StatusChanged,
    AppConnected,
}

impl EventName {
    pub const ALL: [EventName; 6] = [
        EventName::OverlayChanged,
        EventName::StartStream,
        EventName::StopStream,
        EventName::DeviceChanged,
        EventName::StatusChanged,
        EventName::AppConnected,
    ];

    /// Versioned on-disk name of this event's counter file.
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventName::OverlayChanged => "overlay-changed.v1",
            EventName::StartStream => "start-stream.v1",
            EventName::StopStream => "stop-stream.v1",
            EventName::DeviceChanged => "device-changed.v1",
            EventName::StatusChanged => "status-changed.v1",
            EventName::AppConnected => "app-connected.v1",
        }
    }
}

/// Handle returned by [`EventBridge::subscribe`]; pass it back to
/// [`EventBridge::unsubscribe_all`] to drop every callback registered
/// under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

type Callback = Box<dyn Fn() + Send + Sync>;

struct Subscription {
    token: SubscriptionToken,
    event: EventName,
    callback: Callback,
}

/// Typed pub/sub over per-event counter files.
pub struct EventBridge {
    dir: PathBuf,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    next_token: AtomicU64,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl EventBridge {
    /// Default cadence of the recheck loop.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

    /// Open a bridge over `dir` (shared with the peer process), creating
    /// the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_poll_interval(dir, Self::DEFAULT_POLL_INTERVAL)
    }

    /// Open with a custom poll interval (tests use a fast one).
    pub fn with_poll_interval(
        dir: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(Self {
            dir,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            next_token: AtomicU64::new(1),
            poll_interval,
            stop: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
        })
    }

    /// Fire-and-forget broadcast of `event`. No payload travels with it.
    pub fn publish(&self, event: EventName) -> Result<(), StoreError> {
        let path = self.dir.join(event.wire_name());
        let current = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let bumped = current.wrapping_add(1).to_string();
        crate::store::atomic_write_raw(&path, bumped.as_bytes())?;
        log::debug!("published {}", event.wire_name());
        Ok(())
    }

    /// Write `value` under `key` in the shared keyspace, then broadcast
    /// `event`. The payload is in place before any subscriber can react.
    pub fn publish_with_payload<T: Serialize>(
        &self,
        event: EventName,
        kv: &KeyValueStore,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        kv.set_json(key, value)?;
        self.publish(event)
    }

    /// Register `callback` for `event`. Callbacks run on the poller thread;
    /// touching state owned by another thread requires re-dispatching there
    /// (the usual pattern is to set an atomic flag the owning loop consumes).
    pub fn subscribe<F>(&self, event: EventName, callback: F) -> SubscriptionToken
    where
        F: Fn() + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                token,
                event,
                callback: Box::new(callback),
            });
        self.ensure_poller();
        token
    }

    /// Drop every subscription registered under `token`.
    pub fn unsubscribe_all(&self, token: SubscriptionToken) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|s| s.token != token);
    }

    /// Start the poller thread on first subscription.
    fn ensure_poller(&self) {
        let mut slot = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }

        let dir = self.dir.clone();
        let subscriptions = Arc::clone(&self.subscriptions);
        let stop = Arc::clone(&self.stop);
        let interval = self.poll_interval;

        *slot = Some(thread::spawn(move || {
            // Seed with the counters as they stand so historical publishes
            // from before this subscriber existed do not fire.
            let mut seen: HashMap<EventName, u64> = EventName::ALL
                .iter()
                .map(|&e| (e, read_counter(&dir, e)))
                .collect();

            while !stop.load(Ordering::SeqCst) {
                for &event in EventName::ALL.iter() {
                    let current = read_counter(&dir, event);
                    let last = seen.get(&event).copied().unwrap_or(0);
                    if current == last {
                        continue;
                    }
                    seen.insert(event, current);
                    let subs = subscriptions.lock().unwrap_or_else(|e| e.into_inner());
                    for sub in subs.iter().filter(|s| s.event == event) {
                        (sub.callback)();
                    }
                }
                thread::sleep(interval);
            }
        }));
    }
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = handle.join();
        }
    }
}

fn read_counter(dir: &std::path::Path, event: EventName) -> u64 {
    std::fs::read_to_string(dir.join(event.wire_name()))
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}
