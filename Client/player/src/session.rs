//! Session-scoped persistence of playback position and mute preference.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Key-value store contract. The hosting page injects the real session
/// storage; tests and the demo binary use [`MemorySessionStore`]. No ambient
/// global is consulted anywhere.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-memory store with session-storage semantics.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries.write().unwrap().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries.write().unwrap().remove(key);
    }
}

pub const SESSION_RECORD_KEY: &str = "player.playback";

/// Writes triggered by time updates are spaced at least this far apart.
const WRITE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutePreference {
    Muted,
    Unmuted,
}

/// The one piece of session-scoped state the player persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPlaybackRecord {
    #[serde(rename = "currentAssetId")]
    pub asset_id: String,
    #[serde(rename = "playbackPositionSeconds")]
    pub position_seconds: f64,
    #[serde(rename = "hasInteracted")]
    pub has_interacted: bool,
    #[serde(rename = "preferredMuteState")]
    pub mute_preference: MutePreference,
}

impl SessionPlaybackRecord {
    fn defaults(asset_id: &str) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            position_seconds: 0.0,
            has_interacted: false,
            mute_preference: MutePreference::Unmuted,
        }
    }
}

/// Seeds playback state at mount and keeps the stored record current.
pub struct SessionContinuity {
    store: Arc<dyn SessionStore>,
    cached: Mutex<SessionPlaybackRecord>,
    restored: bool,
    last_write: Mutex<Option<Instant>>,
}

impl SessionContinuity {
    /// Read the stored record. A record for a different asset is reset to
    /// defaults for `asset_id`; a matching record seeds resume state. The
    /// store always holds an explicit record after this returns.
    pub fn new(store: Arc<dyn SessionStore>, asset_id: &str) -> Self {
        let stored: Option<SessionPlaybackRecord> = store
            .get(SESSION_RECORD_KEY)
            .and_then(|text| serde_json::from_str(&text).ok());
        let (record, restored) = match stored {
            Some(record) if record.asset_id == asset_id => (record, true),
            Some(_) | None => (SessionPlaybackRecord::defaults(asset_id), false),
        };
        let continuity = Self {
            store,
            cached: Mutex::new(record),
            restored,
            last_write: Mutex::new(None),
        };
        if !restored {
            continuity.write_now();
        }
        continuity
    }

    /// Whether a same-asset record seeded this session.
    pub fn restored(&self) -> bool {
        self.restored
    }

    pub fn record(&self) -> SessionPlaybackRecord {
        self.cached.lock().unwrap().clone()
    }

    /// Throttled position write, driven by time-update ticks.
    pub fn record_position(&self, position: f64) {
        self.cached.lock().unwrap().position_seconds = position;
        let due = {
            let mut last = self.last_write.lock().unwrap();
            let due = last.map_or(true, |t| t.elapsed() >= WRITE_INTERVAL);
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if due {
            self.write_now();
        }
    }

    /// Unthrottled write, used on page-hide and teardown.
    pub fn flush(&self, position: f64) {
        self.cached.lock().unwrap().position_seconds = position;
        *self.last_write.lock().unwrap() = Some(Instant::now());
        self.write_now();
    }

    /// First real user interaction; written through only once.
    pub fn mark_interacted(&self) {
        let changed = {
            let mut cached = self.cached.lock().unwrap();
            let changed = !cached.has_interacted;
            cached.has_interacted = true;
            changed
        };
        if changed {
            self.write_now();
        }
    }

    pub fn record_mute(&self, muted: bool) {
        let preference = if muted {
            MutePreference::Muted
        } else {
            MutePreference::Unmuted
        };
        self.cached.lock().unwrap().mute_preference = preference;
        self.write_now();
    }

    fn write_now(&self) {
        let record = self.cached.lock().unwrap().clone();
        match serde_json::to_string(&record) {
            Ok(text) => self.store.set(SESSION_RECORD_KEY, text),
            Err(e) => debug!("failed to serialize session record: {e}"),
        }
    }
}
