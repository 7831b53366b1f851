//! Per-key async locks.
//!
//! Entries are created on first use and dropped once nobody holds or waits on them, so
//! the map only ever contains keys with in-flight work.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// A set of async mutexes addressed by key
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    entries: LockMap<K>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait until the lock for `key` is free, then take it.
    pub async fn lock(&self, key: K) -> KeyedGuard<K> {
        let mutex = self.entry(&key);
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            key,
            entries: Arc::clone(&self.entries),
            guard: Some(guard),
        }
    }

    /// Take the lock for `key` only if nobody holds it.
    pub fn try_lock(&self, key: K) -> Option<KeyedGuard<K>> {
        let mutex = self.entry(&key);
        let guard = mutex.try_lock_owned().ok()?;
        Some(KeyedGuard {
            key,
            entries: Arc::clone(&self.entries),
            guard: Some(guard),
        })
    }

    pub fn is_locked(&self, key: &K) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .is_some_and(|mutex| mutex.try_lock().is_err())
    }

    fn entry(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Held lock for one key; released on drop
pub struct KeyedGuard<K: Eq + Hash + Clone> {
    key: K,
    entries: LockMap<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<K> {
    fn drop(&mut self) {
        self.guard.take();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map's own reference left: no holder, no waiter.
        if entries
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            entries.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_try_lock_is_exclusive_per_key() {
        let locks = KeyedLocks::new();
        let first = locks.try_lock("a").unwrap();
        assert!(locks.try_lock("a").is_none());
        assert!(locks.try_lock("b").is_some());
        assert!(locks.is_locked(&"a"));

        drop(first);
        assert!(!locks.is_locked(&"a"));
        assert!(locks.try_lock("a").is_some());
    }

    #[tokio::test]
    async fn test_entries_are_removed_when_released() {
        let locks = KeyedLocks::new();
        {
            let _a = locks.lock(1u32).await;
            let _b = locks.lock(2u32).await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock("k").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }
}
