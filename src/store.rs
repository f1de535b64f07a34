//! # Shared State Store
//!
//! An in-process key-value store shared by every connection. It holds the serialized
//! Room and Game records plus the per-round recording indexes, and publishes a
//! keyspace notification on every mutation so that sessions can follow the records
//! they care about (see `events.rs`).
//!
//! ## Key Layout:
//! - `room:{CODE}` → Room JSON
//! - `room:{CODE}:game` → Game JSON
//! - `game:{CODE}:round:{N}` → hash of player_id → file location JSON
//!
//! ## Concurrency:
//! Every value carries a version that changes on each write. Read-modify-write
//! callers go through [`StateStore::mutate_json`], which only commits when the
//! version it read is still current and retries otherwise, so two players joining
//! the same room at once can never overwrite each other's update.
//!
//! Notifications are sent while the write lock is held. This keeps the order in which
//! subscribers observe changes of one key identical to the order they were applied.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::debug;

/// How many notifications a slow subscriber may fall behind before it starts
/// skipping them.
const NOTIFICATION_CAPACITY: usize = 1024;

/// What happened to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEventKind {
    /// A text value was written. Carries the value exactly as written, so a
    /// subscriber sees every state of the key even if later writes follow quickly.
    Set(String),
    /// One field of a hash was written.
    FieldSet,
    Deleted,
}

/// A keyspace notification: `key` was written or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub kind: KeyEventKind,
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    version: u64,
    value: Value,
}

/// A text value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub version: u64,
    pub value: String,
}

/// Outcome of a read-modify-write step computed by the caller.
#[derive(Debug)]
pub enum Mutation<T> {
    /// Leave the key untouched.
    Keep,
    /// Write the new value.
    Put(T),
    /// Remove the key.
    Delete,
}

/// The shared store. Cheap to share behind an `Arc`.
pub struct StateStore {
    entries: RwLock<HashMap<String, Entry>>,
    next_version: AtomicU64,
    notifications: broadcast::Sender<KeyEvent>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            notifications,
        }
    }

    /// Open a new keyspace notification stream.
    ///
    /// The receiver sees every mutation applied after this call returns.
    pub fn watch(&self) -> broadcast::Receiver<KeyEvent> {
        self.notifications.subscribe()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn publish(&self, key: &str, kind: KeyEventKind) {
        // No receivers is not an error: nobody is watching yet.
        let _ = self.notifications.send(KeyEvent { key: key.to_string(), kind });
    }

    pub fn exists(&self, key: &str) -> bool {
        self.read_entries().contains_key(key)
    }

    /// Read a text value and its version.
    pub fn get(&self, key: &str) -> Result<Option<Versioned>> {
        match self.read_entries().get(key) {
            None => Ok(None),
            Some(Entry { version, value: Value::Text(text) }) => Ok(Some(Versioned {
                version: *version,
                value: text.clone(),
            })),
            Some(Entry { value: Value::Hash(_), .. }) => bail!("key {} holds a hash, not a value", key),
        }
    }

    /// Unconditionally write a text value.
    #[cfg(test)]
    pub fn set(&self, key: &str, value: String) {
        let mut entries = self.write_entries();
        let version = self.bump_version();
        entries.insert(key.to_string(), Entry { version, value: Value::Text(value.clone()) });
        self.publish(key, KeyEventKind::Set(value));
    }

    /// Write `value` only if `key` does not exist yet. Returns whether it was written.
    pub fn set_if_absent(&self, key: &str, value: String) -> bool {
        let mut entries = self.write_entries();
        if entries.contains_key(key) {
            return false;
        }
        let version = self.bump_version();
        entries.insert(key.to_string(), Entry { version, value: Value::Text(value.clone()) });
        self.publish(key, KeyEventKind::Set(value));
        true
    }

    /// Write (`Some`) or delete (`None`) `key` if its current version still equals
    /// `expected` (`None` meaning "the key must not exist"). Returns whether the
    /// write was applied.
    pub fn compare_and_swap(&self, key: &str, expected: Option<u64>, value: Option<String>) -> bool {
        let mut entries = self.write_entries();
        let current = entries.get(key).map(|entry| entry.version);
        if current != expected {
            return false;
        }

        match value {
            Some(text) => {
                let version = self.bump_version();
                entries.insert(key.to_string(), Entry { version, value: Value::Text(text.clone()) });
                self.publish(key, KeyEventKind::Set(text));
            }
            None => {
                if entries.remove(key).is_some() {
                    self.publish(key, KeyEventKind::Deleted);
                }
            }
        }
        true
    }

    /// Remove a key of any type. Returns whether something was removed.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.write_entries();
        let removed = entries.remove(key).is_some();
        if removed {
            self.publish(key, KeyEventKind::Deleted);
        }
        removed
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.write_entries();
        let doomed: Vec<String> = entries.keys().filter(|key| key.starts_with(prefix)).cloned().collect();
        for key in &doomed {
            entries.remove(key);
            self.publish(key, KeyEventKind::Deleted);
        }
        doomed.len()
    }

    /// Keys starting with `prefix`, in no particular order.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        self.read_entries().keys().filter(|key| key.starts_with(prefix)).cloned().collect()
    }

    /// Set one field of a hash, creating the hash if needed.
    pub fn hset(&self, key: &str, field: &str, value: String) -> Result<()> {
        let mut entries = self.write_entries();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            version: 0,
            value: Value::Hash(HashMap::new()),
        });
        match &mut entry.value {
            Value::Hash(fields) => {
                fields.insert(field.to_string(), value);
            }
            Value::Text(_) => bail!("key {} holds a value, not a hash", key),
        }
        entry.version = self.bump_version();
        self.publish(key, KeyEventKind::FieldSet);
        Ok(())
    }

    pub fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        match self.read_entries().get(key) {
            None => Ok(None),
            Some(Entry { value: Value::Hash(fields), .. }) => Ok(fields.get(field).cloned()),
            Some(Entry { value: Value::Text(_), .. }) => bail!("key {} holds a value, not a hash", key),
        }
    }

    /// Read and deserialize a JSON record.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            None => Ok(None),
            Some(versioned) => {
                let record = serde_json::from_str(&versioned.value)
                    .with_context(|| format!("corrupt record stored under {}", key))?;
                Ok(Some(record))
            }
        }
    }

    /// Serialize `record` and write it only if `key` is free.
    pub fn put_json_if_absent<T: Serialize>(&self, key: &str, record: &T) -> Result<bool> {
        let json = serde_json::to_string(record)?;
        Ok(self.set_if_absent(key, json))
    }

    /// Optimistic read-modify-write of a JSON record.
    ///
    /// `step` receives the current record (or `None`) and decides what to do with it,
    /// also producing the value returned to the caller. If another writer changed the
    /// key in between, the step is re-run against the fresh record, so `step` must
    /// be free of side effects.
    pub fn mutate_json<T, R, F>(&self, key: &str, mut step: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(Option<T>) -> (Mutation<T>, R),
    {
        loop {
            let current = self.get(key)?;
            let version = current.as_ref().map(|versioned| versioned.version);
            let record = match &current {
                Some(versioned) => Some(
                    serde_json::from_str(&versioned.value)
                        .with_context(|| format!("corrupt record stored under {}", key))?,
                ),
                None => None,
            };

            let (mutation, output) = step(record);
            let committed = match mutation {
                Mutation::Keep => true,
                Mutation::Put(next) => {
                    let json = serde_json::to_string(&next)?;
                    self.compare_and_swap(key, version, Some(json))
                }
                Mutation::Delete => self.compare_and_swap(key, version, None),
            };

            if committed {
                return Ok(output);
            }
            debug!(key, "concurrent write detected, retrying mutation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn test_compare_and_swap_rejects_stale_version() {
        let store = StateStore::new();
        store.set("k", "a".to_string());
        let first = store.get("k").unwrap().unwrap();

        assert!(store.compare_and_swap("k", Some(first.version), Some("b".to_string())));
        // The version moved on, so a writer still holding the old one must lose.
        assert!(!store.compare_and_swap("k", Some(first.version), Some("c".to_string())));
        assert_eq!(store.get("k").unwrap().unwrap().value, "b");
    }

    #[test]
    fn test_set_if_absent_only_writes_once() {
        let store = StateStore::new();
        assert!(store.set_if_absent("room:ABCD", "first".to_string()));
        assert!(!store.set_if_absent("room:ABCD", "second".to_string()));
        assert_eq!(store.get("room:ABCD").unwrap().unwrap().value, "first");
    }

    #[test]
    fn test_hash_and_text_values_do_not_mix() {
        let store = StateStore::new();
        store.hset("game:ABCD:round:1", "p1", "x".to_string()).unwrap();
        assert_eq!(store.hget("game:ABCD:round:1", "p1").unwrap(), Some("x".to_string()));
        assert_eq!(store.hget("game:ABCD:round:1", "p2").unwrap(), None);
        assert!(store.get("game:ABCD:round:1").is_err());
        assert_eq!(store.hget("game:ABCD:round:2", "p1").unwrap(), None);
    }

    #[test]
    fn test_failed_hset_leaves_value_and_notifications_alone() {
        let store = StateStore::new();
        store.set("room:ABCD", "1".to_string());
        let before = store.get("room:ABCD").unwrap().unwrap();
        let mut events = store.watch();

        assert!(store.hset("room:ABCD", "p1", "x".to_string()).is_err());

        assert_eq!(store.get("room:ABCD").unwrap().unwrap(), before);
        assert!(events.try_recv().is_err());
        // The next write still gets a fresh, higher version.
        store.set("room:ABCD", "2".to_string());
        assert!(store.get("room:ABCD").unwrap().unwrap().version > before.version);
    }

    #[test]
    fn test_delete_prefix() {
        let store = StateStore::new();
        store.hset("game:ABCD:round:1", "p1", "x".to_string()).unwrap();
        store.hset("game:ABCD:round:2", "p1", "x".to_string()).unwrap();
        store.hset("game:WXYZ:round:1", "p1", "x".to_string()).unwrap();

        assert_eq!(store.delete_prefix("game:ABCD:round:"), 2);
        assert_eq!(store.keys("game:").len(), 1);
    }

    #[test]
    fn test_concurrent_mutations_are_not_lost() {
        let store = Arc::new(StateStore::new());
        store.put_json_if_absent("counter", &Counter { hits: 0 }).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store
                            .mutate_json("counter", |current: Option<Counter>| match current {
                                Some(c) => (Mutation::Put(Counter { hits: c.hits + 1 }), ()),
                                None => (Mutation::Keep, ()),
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let counter: Counter = store.get_json("counter").unwrap().unwrap();
        assert_eq!(counter.hits, 800);
    }

    #[tokio::test]
    async fn test_notifications_follow_mutation_order() {
        let store = StateStore::new();
        let mut events = store.watch();

        store.set("room:ABCD", "1".to_string());
        store.hset("game:ABCD:round:1", "p1", "x".to_string()).unwrap();
        store.delete("room:ABCD");

        let kinds: Vec<(String, KeyEventKind)> = (0..3)
            .map(|_| {
                let event = events.try_recv().unwrap();
                (event.key, event.kind)
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("room:ABCD".to_string(), KeyEventKind::Set("1".to_string())),
                ("game:ABCD:round:1".to_string(), KeyEventKind::FieldSet),
                ("room:ABCD".to_string(), KeyEventKind::Deleted),
            ]
        );
    }
}
