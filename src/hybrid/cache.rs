use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::message::types::now_micros;

/// Default entry lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Bound on resident entries.
pub const CACHE_CAPACITY: usize = 1000;

struct CacheEntry {
    value: String,
    stored_at_us: u64,
}

/// Read-through cache in front of both replication paths.
///
/// Entries are fresh while `now - stored_at < ttl`; a stale entry found by
/// `try_read` is erased on the spot. When the bound is exceeded the entry
/// with the smallest `stored_at` is evicted.
pub struct ReadCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl_us: AtomicU64,
    capacity: usize,
}

impl ReadCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, CACHE_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_us: AtomicU64::new(ttl.as_micros() as u64),
            capacity,
        }
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_us.store(ttl.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn try_read(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        let entry = entries.get(key)?;

        let age = now_micros().saturating_sub(entry.stored_at_us);
        if age < self.ttl_us.load(Ordering::Relaxed) {
            return Some(entry.value.clone());
        }

        entries.remove(key);
        None
    }

    pub fn update(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().expect("cache mutex poisoned");
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                stored_at_us: now_micros(),
            },
        );

        if entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at_us)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
