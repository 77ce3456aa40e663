//! Shared timestamp/event helpers and the injectable clock.

use serde_json::Value as JsonValue;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use ulid::Ulid;

/// Source of wall-clock time and blocking sleeps.
///
/// The readiness poll is the only caller that sleeps; swapping the clock lets
/// tests walk through the full attempt ceiling without waiting.
pub trait Clock: Send + Sync {
    fn now_epoch_secs(&self) -> u64;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that never blocks. `sleep` advances the reported time and records
/// the requested duration.
#[derive(Debug, Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: u64,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn starting_at(now: u64) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .map(|s| s.sleeps.clone())
            .unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> u64 {
        self.state.lock().map(|s| s.now).unwrap_or_default()
    }

    fn sleep(&self, duration: Duration) {
        if let Ok(mut s) = self.state.lock() {
            s.now += duration.as_secs();
            s.sleeps.push(duration);
        }
    }
}

/// Formats unix-epoch seconds with a `Z` suffix (e.g. `1771220592Z`).
pub fn epoch_z(secs: u64) -> String {
    format!("{}Z", secs)
}

/// Parses a value produced by [`epoch_z`].
pub fn parse_epoch_z(value: &str) -> Option<u64> {
    value.trim_end_matches('Z').parse().ok()
}

pub fn now_epoch_z() -> String {
    epoch_z(SystemClock.now_epoch_secs())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// Prefixed record id, e.g. `A_01J...` for accounts.
pub fn new_record_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Standard command response envelope shape used across CLI surfaces.
pub fn command_envelope(cmd: &str, status: &str, extra: JsonValue) -> JsonValue {
    let mut base = serde_json::json!({
        "envelope_version": "1.0.0",
        "ts": now_epoch_z(),
        "event_id": new_event_id(),
        "cmd": cmd,
        "status": status
    });
    if let (Some(base_obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    base
}
