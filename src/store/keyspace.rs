//! Shared low-latency keyspace with per-key expiry
//!
//! Values are strings, lists, sets or hashes addressed by string keys. Every
//! multi-step operation goes through [`SharedStore::atomic`], which runs a closure
//! against a [`Transaction`] while holding the keyspace exclusively. A check and
//! the write that depends on it therefore never interleave with another caller.
//!
//! Writes inside a transaction are applied immediately; callers validate before
//! they write.

use crate::error::{Result, TournamentError};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    Hash(BTreeMap<String, String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(list) => list.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Handle to the shared keyspace; cheap to clone
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl SharedStore {
    /// Create an empty keyspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` atomically against the keyspace
    pub async fn atomic<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut entries = self.entries.lock().map_err(|_| TournamentError::Store {
            message: "Failed to acquire keyspace lock".to_string(),
        })?;

        let mut tx = Transaction {
            entries: &mut entries,
            now: Instant::now(),
        };
        op(&mut tx)
    }

    /// Remaining time to live of a key, `None` when missing or persistent
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.atomic(|tx| Ok(tx.ttl(key))).await
    }

    /// Whether a live key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.atomic(|tx| Ok(tx.exists(key))).await
    }

    /// Number of live keys
    pub async fn key_count(&self) -> Result<usize> {
        self.atomic(|tx| Ok(tx.keys_with_prefix("").len())).await
    }

    /// Drop every expired key, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize> {
        let removed = self
            .atomic(|tx| {
                let now = tx.now;
                let before = tx.entries.len();
                tx.entries.retain(|_, entry| !entry.is_expired(now));
                Ok(before - tx.entries.len())
            })
            .await?;

        if removed > 0 {
            debug!("Purged {} expired keys", removed);
        }
        Ok(removed)
    }
}

/// Exclusive view of the keyspace for the duration of one atomic operation
pub struct Transaction<'a> {
    entries: &'a mut HashMap<String, Entry>,
    now: Instant,
}

impl Transaction<'_> {
    fn purge_if_expired(&mut self, key: &str) {
        let expired = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(self.now));
        if expired {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_if_expired(key);
        self.entries.get_mut(key)
    }

    fn live_or_insert(&mut self, key: &str, empty: Value) -> &mut Entry {
        self.purge_if_expired(key);
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(empty))
    }

    fn drop_if_empty(&mut self, key: &str) {
        let empty = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.value.is_empty_collection());
        if empty {
            self.entries.remove(key);
        }
    }

    fn wrong_type(key: &str, expected: &str, actual: &Value) -> anyhow::Error {
        TournamentError::Store {
            message: format!(
                "Key '{}' holds a {} but a {} was expected",
                key,
                actual.type_name(),
                expected
            ),
        }
        .into()
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.purge_if_expired(key);
        self.entries.remove(key).is_some()
    }

    pub fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(entry) => Err(Self::wrong_type(key, "string", &entry.value)),
        }
    }

    /// Set a string value, clearing any previous expiry
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.into())));
    }

    /// Set a string value that expires after `ttl`
    pub fn set_ex(&mut self, key: &str, value: impl Into<String>, ttl: Duration) {
        self.set(key, value);
        self.expire(key, ttl);
    }

    pub fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64> {
        let current = match self.get(key)? {
            Some(raw) => raw.parse::<i64>().map_err(|_| TournamentError::Store {
                message: format!("Key '{}' does not hold an integer", key),
            })?,
            None => 0,
        };
        let next = current + delta;
        let expires_at = self.live(key).and_then(|entry| entry.expires_at);
        self.set(key, next.to_string());
        if let Some(entry) = self.entries.get_mut(key) {
            entry.expires_at = expires_at;
        }
        Ok(next)
    }

    pub fn rpush(&mut self, key: &str, value: impl Into<String>) -> Result<usize> {
        let entry = self.live_or_insert(key, Value::List(VecDeque::new()));
        match &mut entry.value {
            Value::List(list) => {
                list.push_back(value.into());
                Ok(list.len())
            }
            other => Err(Self::wrong_type(key, "list", other)),
        }
    }

    pub fn lpop(&mut self, key: &str) -> Result<Option<String>> {
        let popped = match self.live(key) {
            None => return Ok(None),
            Some(entry) => match &mut entry.value {
                Value::List(list) => list.pop_front(),
                other => return Err(Self::wrong_type(key, "list", other)),
            },
        };
        self.drop_if_empty(key);
        Ok(popped)
    }

    pub fn llen(&mut self, key: &str) -> Result<usize> {
        match self.live(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.len()),
                other => Err(Self::wrong_type(key, "list", other)),
            },
        }
    }

    /// Whole list, head first
    pub fn lrange(&mut self, key: &str) -> Result<Vec<String>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.iter().cloned().collect()),
                other => Err(Self::wrong_type(key, "list", other)),
            },
        }
    }

    pub fn lindex(&mut self, key: &str, index: usize) -> Result<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::List(list) => Ok(list.get(index).cloned()),
                other => Err(Self::wrong_type(key, "list", other)),
            },
        }
    }

    /// Remove up to `count` occurrences of `value` from the head side; `0` removes all
    pub fn lrem(&mut self, key: &str, value: &str, count: usize) -> Result<usize> {
        let removed = match self.live(key) {
            None => return Ok(0),
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    let mut removed = 0;
                    list.retain(|item| {
                        if item == value && (count == 0 || removed < count) {
                            removed += 1;
                            false
                        } else {
                            true
                        }
                    });
                    removed
                }
                other => return Err(Self::wrong_type(key, "list", other)),
            },
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    pub fn sadd(&mut self, key: &str, member: impl Into<String>) -> Result<bool> {
        let entry = self.live_or_insert(key, Value::Set(BTreeSet::new()));
        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.into())),
            other => Err(Self::wrong_type(key, "set", other)),
        }
    }

    pub fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        let removed = match self.live(key) {
            None => return Ok(false),
            Some(entry) => match &mut entry.value {
                Value::Set(set) => set.remove(member),
                other => return Err(Self::wrong_type(key, "set", other)),
            },
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    pub fn sismember(&mut self, key: &str, member: &str) -> Result<bool> {
        match self.live(key) {
            None => Ok(false),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.contains(member)),
                other => Err(Self::wrong_type(key, "set", other)),
            },
        }
    }

    pub fn scard(&mut self, key: &str) -> Result<usize> {
        match self.live(key) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.len()),
                other => Err(Self::wrong_type(key, "set", other)),
            },
        }
    }

    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        match self.live(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                other => Err(Self::wrong_type(key, "set", other)),
            },
        }
    }

    pub fn hset(&mut self, key: &str, field: &str, value: impl Into<String>) -> Result<()> {
        let entry = self.live_or_insert(key, Value::Hash(BTreeMap::new()));
        match &mut entry.value {
            Value::Hash(hash) => {
                hash.insert(field.to_string(), value.into());
                Ok(())
            }
            other => Err(Self::wrong_type(key, "hash", other)),
        }
    }

    pub fn hget(&mut self, key: &str, field: &str) -> Result<Option<String>> {
        match self.live(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Hash(hash) => Ok(hash.get(field).cloned()),
                other => Err(Self::wrong_type(key, "hash", other)),
            },
        }
    }

    pub fn hgetall(&mut self, key: &str) -> Result<BTreeMap<String, String>> {
        match self.live(key) {
            None => Ok(BTreeMap::new()),
            Some(entry) => match &entry.value {
                Value::Hash(hash) => Ok(hash.clone()),
                other => Err(Self::wrong_type(key, "hash", other)),
            },
        }
    }

    pub fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        let deadline = self.now + ttl;
        match self.live(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                true
            }
            None => false,
        }
    }

    pub fn persist(&mut self, key: &str) -> bool {
        match self.live(key) {
            Some(entry) => entry.expires_at.take().is_some(),
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &str) -> Option<Duration> {
        let now = self.now;
        self.live(key)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Live keys starting with `prefix`, sorted
    pub fn keys_with_prefix(&mut self, prefix: &str) -> Vec<String> {
        let now = self.now;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Refresh the expiry of every key under `prefix`
    pub fn expire_prefix(&mut self, prefix: &str, ttl: Duration) -> usize {
        let keys = self.keys_with_prefix(prefix);
        for key in &keys {
            self.expire(key, ttl);
        }
        keys.len()
    }

    /// Delete every key under `prefix`
    pub fn del_prefix(&mut self, prefix: &str) -> usize {
        let keys = self.keys_with_prefix(prefix);
        for key in &keys {
            self.entries.remove(key);
        }
        keys.len()
    }
}
