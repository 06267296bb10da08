//! Shared, TTL-bounded state store with per-key mutual exclusion.
//!
//! [`KeyValueStore`] is the backend seam (an in-memory map here, a networked
//! key-value server in a multi-process deployment). [`StateStore`] layers typed
//! access and `update_atomic` on top: a lease on `lock:{key}` is acquired with a
//! bounded wait, the mutator runs on the current value, the result is written back,
//! and the lease is released only if the caller still holds it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{EngineError, EngineResult, StoreError};

pub mod memory;

pub use memory::InMemoryKeyValueStore;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes `value`; `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Sets `key` to `token` only if it is absent or expired. Returns whether the lease
    /// was taken.
    async fn try_acquire_lease(&self, key: &str, token: &str, lease: Duration) -> Result<bool, StoreError>;

    /// Deletes `key` only if it still holds `token`. Returns whether it did.
    async fn release_lease(&self, key: &str, token: &str) -> Result<bool, StoreError>;
}

fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

/// Typed store of JSON-encoded values.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
    config: StoreConfig,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, config: StoreConfig) -> Self {
        Self { kv, config }
    }

    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(Arc::new(InMemoryKeyValueStore::new()), config)
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.state_ttl()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.kv.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.kv.set(key, raw, Some(ttl)).await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.kv.delete(key).await
    }

    /// Applies `mutator` to the value at `key` under the key's lock and persists the
    /// result with `ttl`.
    ///
    /// Returns `Ok(None)` when there is no value, and
    /// [`EngineError::LockContention`] when the lock is not obtained within the
    /// configured wait.
    pub async fn update_atomic<T, R, F>(&self, key: &str, ttl: Duration, mutator: F) -> EngineResult<Option<(T, R)>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&mut T) -> R + Send,
    {
        let lock = lock_key(key);
        let token = format!("{:016x}", rand::thread_rng().gen::<u64>());
        self.acquire(&lock, &token).await?;

        let result = self.mutate_locked(key, ttl, mutator).await;

        match self.kv.release_lease(&lock, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(key, "lease expired before release; another holder may have run"),
            Err(err) => warn!(key, error = %err, "failed to release lease"),
        }
        result
    }

    async fn mutate_locked<T, R, F>(&self, key: &str, ttl: Duration, mutator: F) -> EngineResult<Option<(T, R)>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce(&mut T) -> R + Send,
    {
        let Some(mut value) = self.get::<T>(key).await? else {
            return Ok(None);
        };
        let out = mutator(&mut value);
        self.set(key, &value, ttl).await?;
        Ok(Some((value, out)))
    }

    async fn acquire(&self, lock: &str, token: &str) -> EngineResult<()> {
        let lease = Duration::from_millis(self.config.lease_ms);
        let poll = Duration::from_millis(self.config.lock_poll_ms.max(1));
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.lock_wait_ms);
        loop {
            if self.kv.try_acquire_lease(lock, token, lease).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() + poll > deadline {
                debug!(lock, "gave up waiting for lock");
                return Err(EngineError::LockContention {
                    key: lock.trim_start_matches("lock:").to_string(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }
}
