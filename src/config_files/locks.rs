use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Keyed mutual exclusion: at most one closure runs per key at a time.
///
/// Entries are created on first use and dropped again once nobody holds or
/// waits on them, so the table only grows with concurrent keys.
#[derive(Default)]
pub struct FileLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = entry.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the table plus ours: nobody else is waiting.
        if Arc::strong_count(&entry) == 2 {
            table.remove(key);
        }
        result
    }

    pub fn held_keys(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_is_serialized() {
        let locks = Arc::new(FileLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (locks, inside, max_seen) = (locks.clone(), inside.clone(), max_seen.clone());
                thread::spawn(move || {
                    locks.with_lock("ExtA/config.yml", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(5));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.held_keys(), 0);
    }

    #[test]
    fn returns_closure_value_and_cleans_up() {
        let locks = FileLocks::new();
        assert_eq!(locks.with_lock("a", || 7), 7);
        assert_eq!(locks.held_keys(), 0);
    }
}
