use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::KeyValueStore;
use crate::error::StoreError;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Single-process key-value store with lazy TTL expiry.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.is_live(now) => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|t| Instant::now() + t);
        self.entries
            .lock()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn try_acquire_lease(&self, key: &str, token: &str, lease: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: token.to_string(),
                expires_at: Some(now + lease),
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.is_live(now) && e.value == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
