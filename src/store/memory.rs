//! In-process counter store.
//!
//! Backs the test suite and local runs without Redis. Expiry follows the
//! tokio clock so paused-time tests can roll windows over. Expired entries are
//! swept at most once per `SWEEP_INTERVAL` on writes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{CounterStore, StoreError, WindowCount};

#[derive(Debug)]
enum Slot {
    Counter(u64),
    Value(String),
}

/// Minimum time between two sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Instant,
}

#[derive(Debug)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Instant,
}

impl Entries {
    /// Drop expired entries if the last sweep is old enough.
    fn sweep(&mut self, now: Instant) {
        if now < self.next_sweep {
            return;
        }
        self.map.retain(|_, e| e.expires_at > now);
        self.next_sweep = now + SWEEP_INTERVAL;
    }
}

/// Mutex-guarded map with per-key expiry.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                next_sweep: Instant::now() + SWEEP_INTERVAL,
            }),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A panic while holding the guard cannot leave a half-written entry.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.sweep(now);

        let entry = entries
            .map
            .entry(key.to_string())
            .and_modify(|e| {
                if e.expires_at <= now {
                    e.slot = Slot::Counter(0);
                    e.expires_at = now + window;
                }
            })
            .or_insert_with(|| Entry {
                slot: Slot::Counter(0),
                expires_at: now + window,
            });

        let count = match &mut entry.slot {
            Slot::Counter(n) => {
                *n += 1;
                *n
            }
            Slot::Value(v) => {
                return Err(StoreError::UnexpectedReply(format!(
                    "key {key} holds a plain value ({v}), not a counter"
                )));
            }
        };

        Ok(WindowCount {
            count,
            reset_after: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = self.lock();
        Ok(entries
            .map
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| match &e.slot {
                Slot::Counter(n) => n.to_string(),
                Slot::Value(v) => v.clone(),
            }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.sweep(now);
        entries.map.insert(
            key.to_string(),
            Entry {
                slot: Slot::Value(value.to_string()),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
