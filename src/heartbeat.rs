use chrono::{DateTime, Duration, Utc};
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::hub::{publish_best_effort, BroadcastHub, Topic};
use crate::record::Heartbeat;

/// How often each listener announces itself.
pub const TICK: std::time::Duration = std::time::Duration::from_secs(2);

/// A heartbeat older than this (about 4 missed ticks) means "down".
pub const STALE_AFTER_SECS: i64 = 8;

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum ServiceState {
    Running,
    Down,
}

/// Latest heartbeat per service, overwritten on every tick. The emitters
/// only write and the health check only reads, so a plain mutex is enough.
pub struct HeartbeatStore {
    inner: Mutex<HashMap<String, Heartbeat>>,
}

impl HeartbeatStore {
    pub fn new() -> Self {
        HeartbeatStore {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn write(&self, heartbeat: Heartbeat) {
        match self.inner.lock() {
            Ok(mut inner) => {
                inner.insert(heartbeat.service.clone(), heartbeat);
            }
            Err(e) => warn!("could not record heartbeat: {}", e),
        }
    }

    pub fn last(&self, service: &str) -> Option<Heartbeat> {
        self.inner.lock().ok()?.get(service).cloned()
    }
}

impl Default for HeartbeatStore {
    fn default() -> Self {
        HeartbeatStore::new()
    }
}

/// A heartbeat seen within the staleness threshold reports the service as
/// running; silence (or no heartbeat at all) reports it as down.
pub fn liveness(store: &HeartbeatStore, service: &str, now: DateTime<Utc>) -> ServiceState {
    match store.last(service) {
        Some(heartbeat) if now.signed_duration_since(heartbeat.at) < Duration::seconds(STALE_AFTER_SECS) => ServiceState::Running,
        _ => ServiceState::Down,
    }
}

/// Stops the paired emitter when dropped. A listener holds its guard for the
/// lifetime of the serve loop, so a loop that exits on error takes the
/// heartbeat down with it and liveness reads Down once the last tick goes
/// stale.
pub struct EmitterGuard {
    stop: Arc<AtomicBool>,
}

impl EmitterGuard {
    pub fn new(stop: Arc<AtomicBool>) -> Self {
        EmitterGuard { stop }
    }
}

impl Drop for EmitterGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Ticks alongside a listener until told to stop: one heartbeat into the
/// store and onto the status topic per tick, whether or not any datagrams
/// arrived.
pub fn emit(service: &str, port: u16, store: &HeartbeatStore, hub: &dyn BroadcastHub, stop: &AtomicBool) {
    while !stop.load(Ordering::Relaxed) {
        let heartbeat = Heartbeat {
            service: service.to_string(),
            at: Utc::now(),
            pid: std::process::id(),
            port,
        };
        store.write(heartbeat.clone());

        if let Ok(payload) = serde_json::to_string(&heartbeat) {
            publish_best_effort(hub, Topic::Status, &payload);
        }

        thread::sleep(TICK);
    }
}
