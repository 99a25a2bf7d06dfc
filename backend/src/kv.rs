//! # Shared Key-Value Store
//!
//! The queue, the refill lock, client leases and the level statistics all
//! live in a shared store with Redis-like semantics: typed values under
//! string keys, optional per-key expiry, and a handful of atomic compound
//! operations. Coordination between server processes relies on nothing else.
//!
//! [`MemoryStore`] is the in-process implementation. Its expired keys are
//! evicted lazily when touched, and its time comes from `tokio::time` so
//! tests can pause and advance the clock. Processes that share a database
//! file use [`crate::sqlite_kv::SqliteKeyValueStore`] instead.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{BackendError, BackendResult};

/// Store capabilities the queue algorithm is written against
///
/// Every method is atomic with respect to the other methods.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Remove and return the first element of a list
    async fn list_pop_front(&self, key: &str) -> BackendResult<Option<String>>;

    /// Delete the list, push `values` in order and set its expiry
    async fn list_replace(&self, key: &str, values: &[String], ttl: Duration)
        -> BackendResult<()>;

    /// Push `value` to the front of a list, creating it with `ttl` if absent
    async fn list_push_front(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()>;

    async fn list_len(&self, key: &str) -> BackendResult<usize>;

    /// Set `key` only if it does not exist; `true` when this call set it
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool>;

    /// `true` when something was deleted
    async fn delete(&self, key: &str) -> BackendResult<bool>;

    /// Delete `key` only while it still holds `expected`; `true` when deleted
    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool>;

    async fn exists(&self, key: &str) -> BackendResult<bool>;

    async fn hash_get(&self, key: &str, field: &str) -> BackendResult<Option<String>>;

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>>;

    /// Set one field and refresh the expiry of the whole hash
    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl: Duration)
        -> BackendResult<()>;

    /// Replace the whole hash with `entries`
    async fn hash_replace(
        &self,
        key: &str,
        entries: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> BackendResult<()>;

    /// Add signed deltas to integer fields, all or nothing
    ///
    /// Applied only when the hash exists; returns whether it did. Fields
    /// that drop to zero or below are removed.
    async fn hash_increment_existing(
        &self,
        key: &str,
        increments: &[(String, i64)],
    ) -> BackendResult<bool>;
}

#[derive(Debug)]
enum Value {
    Text(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process [`KeyValueStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations performed so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `f` on the live entry map after dropping `key` if it expired
    fn with_live<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(Instant::now())) {
            entries.remove(key);
        }
        f(&mut entries)
    }
}

pub(crate) fn wrong_type(key: &str, expected: &str) -> BackendError {
    BackendError::key_value(key, format!("value is not a {expected}"))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn list_pop_front(&self, key: &str) -> BackendResult<Option<String>> {
        let popped = self.with_live(key, |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(None);
            };
            let Value::List(list) = &mut entry.value else {
                return Err(wrong_type(key, "list"));
            };
            let front = list.pop_front();
            if list.is_empty() {
                entries.remove(key);
            }
            Ok(front)
        })?;
        if popped.is_some() {
            self.record_write();
        }
        Ok(popped)
    }

    async fn list_replace(
        &self,
        key: &str,
        values: &[String],
        ttl: Duration,
    ) -> BackendResult<()> {
        self.record_write();
        let mut entries = self.entries.lock();
        if values.is_empty() {
            entries.remove(key);
        } else {
            let list = values.iter().cloned().collect();
            entries.insert(key.to_string(), Entry::new(Value::List(list), Some(ttl)));
        }
        Ok(())
    }

    async fn list_push_front(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()> {
        self.with_live(key, |entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::List(VecDeque::new()), Some(ttl)));
            let Value::List(list) = &mut entry.value else {
                return Err(wrong_type(key, "list"));
            };
            list.push_front(value.to_string());
            Ok(())
        })?;
        self.record_write();
        Ok(())
    }

    async fn list_len(&self, key: &str) -> BackendResult<usize> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len()),
            Some(_) => Err(wrong_type(key, "list")),
        })
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool> {
        let set = self.with_live(key, |entries| {
            if entries.contains_key(key) {
                return false;
            }
            entries.insert(
                key.to_string(),
                Entry::new(Value::Text(value.to_string()), Some(ttl)),
            );
            true
        });
        if set {
            self.record_write();
        }
        Ok(set)
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let deleted = self.with_live(key, |entries| entries.remove(key).is_some());
        if deleted {
            self.record_write();
        }
        Ok(deleted)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool> {
        let deleted = self.with_live(key, |entries| match entries.get(key) {
            Some(Entry {
                value: Value::Text(current),
                ..
            }) if current == expected => entries.remove(key).is_some(),
            _ => false,
        });
        if deleted {
            self.record_write();
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> BackendResult<bool> {
        Ok(self.with_live(key, |entries| entries.contains_key(key)))
    }

    async fn hash_get(&self, key: &str, field: &str) -> BackendResult<Option<String>> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(wrong_type(key, "hash")),
        })
    }

    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>> {
        self.with_live(key, |entries| match entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        })
    }

    async fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Duration,
    ) -> BackendResult<()> {
        self.with_live(key, |entries| {
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new()), None));
            let Value::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(key, "hash"));
            };
            hash.insert(field.to_string(), value.to_string());
            entry.expires_at = Some(Instant::now() + ttl);
            Ok(())
        })?;
        self.record_write();
        Ok(())
    }

    async fn hash_replace(
        &self,
        key: &str,
        entries: HashMap<String, String>,
        ttl: Option<Duration>,
    ) -> BackendResult<()> {
        self.record_write();
        self.entries
            .lock()
            .insert(key.to_string(), Entry::new(Value::Hash(entries), ttl));
        Ok(())
    }

    async fn hash_increment_existing(
        &self,
        key: &str,
        increments: &[(String, i64)],
    ) -> BackendResult<bool> {
        let applied = self.with_live(key, |entries| {
            let Some(entry) = entries.get_mut(key) else {
                return Ok(false);
            };
            let Value::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(key, "hash"));
            };

            // Validate everything first so a bad field leaves the hash untouched
            let mut updated = Vec::with_capacity(increments.len());
            for (field, delta) in increments {
                let current = match hash.get(field) {
                    Some(text) => text.parse::<i64>().map_err(|_| {
                        BackendError::key_value(key, format!("field {field} is not an integer"))
                    })?,
                    None => 0,
                };
                updated.push((field, current + delta));
            }
            for (field, value) in updated {
                if value > 0 {
                    hash.insert(field.clone(), value.to_string());
                } else {
                    hash.remove(field);
                }
            }
            Ok(true)
        })?;
        if applied {
            self.record_write();
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_list_replace_discards_old_contents() {
        let store = MemoryStore::new();
        store.list_replace("q", &strings(&["a", "b"]), TTL).await.unwrap();
        store.list_replace("q", &strings(&["c"]), TTL).await.unwrap();

        assert_eq!(store.list_len("q").await.unwrap(), 1);
        assert_eq!(store.list_pop_front("q").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.list_pop_front("q").await.unwrap(), None);
        assert!(!store.exists("q").await.unwrap(), "empty list is removed");
    }

    #[tokio::test]
    async fn test_set_if_absent_is_exclusive() {
        let store = MemoryStore::new();
        assert!(store.set_if_absent("lock", "1", TTL).await.unwrap());
        assert!(!store.set_if_absent("lock", "2", TTL).await.unwrap());
        assert!(store.delete("lock").await.unwrap());
        assert!(store.set_if_absent("lock", "3", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_if_equals_checks_value() {
        let store = MemoryStore::new();
        store.set_if_absent("lock", "mine", TTL).await.unwrap();
        assert!(!store.delete_if_equals("lock", "theirs").await.unwrap());
        assert!(store.exists("lock").await.unwrap());
        assert!(store.delete_if_equals("lock", "mine").await.unwrap());
        assert!(!store.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn test_push_front_goes_first() {
        let store = MemoryStore::new();
        store.list_replace("q", &strings(&["b", "c"]), TTL).await.unwrap();
        store.list_push_front("q", "a", TTL).await.unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 3);
        assert_eq!(store.list_pop_front("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.list_pop_front("q").await.unwrap().as_deref(), Some("b"));

        store.list_push_front("fresh", "x", TTL).await.unwrap();
        assert_eq!(store.list_len("fresh").await.unwrap(), 1, "missing list is created");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_expire() {
        let store = MemoryStore::new();
        store.set_if_absent("lock", "1", Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!store.exists("lock").await.unwrap());
        assert!(store.set_if_absent("lock", "2", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_requires_existing_hash() {
        let store = MemoryStore::new();
        let deltas = vec![("20:30".to_string(), -1), ("20:50".to_string(), 1)];
        assert!(!store.hash_increment_existing("stats", &deltas).await.unwrap());
        assert!(!store.exists("stats").await.unwrap());

        let initial = HashMap::from([("20:30".to_string(), "1".to_string())]);
        store.hash_replace("stats", initial, None).await.unwrap();
        assert!(store.hash_increment_existing("stats", &deltas).await.unwrap());

        let stats = store.hash_get_all("stats").await.unwrap();
        assert_eq!(stats.get("20:50").map(String::as_str), Some("1"));
        assert!(!stats.contains_key("20:30"), "zero buckets are dropped");
    }

    #[tokio::test]
    async fn test_wrong_type_is_error() {
        let store = MemoryStore::new();
        store.set_if_absent("k", "v", TTL).await.unwrap();
        assert!(matches!(
            store.list_pop_front("k").await,
            Err(BackendError::KeyValue { .. })
        ));
    }
}
