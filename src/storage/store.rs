use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// In-memory key-value store shared by both replication coordinators.
///
/// `write` is an unconditional create-or-replace; `delete` reports whether
/// the key existed. Every call bumps the operation counter, hits and writes
/// additionally bump the success counter.
pub struct LocalStore {
    data: Mutex<HashMap<String, String>>,
    operations: AtomicU64,
    successes: AtomicU64,
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            operations: AtomicU64::new(0),
            successes: AtomicU64::new(0),
        }
    }

    pub fn read(&self, key: &str) -> Option<String> {
        let data = self.data.lock().expect("store mutex poisoned");
        self.operations.fetch_add(1, Ordering::Relaxed);

        match data.get(key) {
            Some(value) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => None,
        }
    }

    pub fn write(&self, key: &str, value: &str) {
        let mut data = self.data.lock().expect("store mutex poisoned");
        data.insert(key.to_string(), value.to_string());
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut data = self.data.lock().expect("store mutex poisoned");
        self.operations.fetch_add(1, Ordering::Relaxed);

        let existed = data.remove(key).is_some();
        if existed {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
        existed
    }

    pub fn len(&self) -> usize {
        self.data.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn success_rate(&self) -> f64 {
        let ops = self.operation_count();
        if ops == 0 {
            return 0.0;
        }
        self.success_count() as f64 / ops as f64
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}
