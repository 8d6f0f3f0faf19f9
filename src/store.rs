use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// Counter state returned by [`SharedStore::increment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment.
    pub value: i64,
    /// Time until the counter expires.
    pub ttl: Duration,
}

/// Abstract storage interface for state shared by every gateway replica.
///
/// Rate buckets, abuse profiles and cache entries all live here; no replica owns them.
/// Every mutation is a single atomic operation against the store, so implementations must
/// not split `increment` or `compare_and_swap` into separate round trips.
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// Atomically add `delta` to the integer at `key` and return the new value.
    ///
    /// A missing key starts at zero and receives `ttl_if_absent` in the same step. An
    /// existing key keeps its expiry; a key found without one is given `ttl_if_absent`.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl_if_absent: Duration,
    ) -> Result<Counter, StoreError>;

    /// Fetch the value for a key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Unconditionally write a value with an expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Write `value` only if the current value equals `expected` (`None` = key absent).
    ///
    /// Returns `Ok(true)` if the write happened, `Ok(false)` if a concurrent writer got
    /// there first (retry needed).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Remove a key, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remove every key starting with `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError>;
}

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    expires_at_millis: u64,
}

/// In-memory shared store.
///
/// Suitable for tests and single-replica deployments. Expired keys are dropped lazily on
/// access, with time read from the injected [`Clock`].
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    data: Arc<Mutex<HashMap<String, StoredValue>>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.lock().values().filter(|v| v.expires_at_millis > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredValue>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live<'a>(
        guard: &'a mut MutexGuard<'_, HashMap<String, StoredValue>>,
        key: &str,
        now: u64,
    ) -> Option<&'a mut StoredValue> {
        let expired = matches!(guard.get(key), Some(v) if v.expires_at_millis <= now);
        if expired {
            guard.remove(key);
        }
        guard.get_mut(key)
    }

    fn expiry(now: u64, ttl: Duration) -> u64 {
        now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl_if_absent: Duration,
    ) -> Result<Counter, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();

        if let Some(existing) = Self::live(&mut guard, key, now) {
            let current: i64 = std::str::from_utf8(&existing.data)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| StoreError::NotAnInteger { key: key.to_string() })?;
            let value = current.saturating_add(delta);
            existing.data = value.to_string().into_bytes();
            let ttl = Duration::from_millis(existing.expires_at_millis.saturating_sub(now));
            return Ok(Counter { value, ttl });
        }

        guard.insert(
            key.to_string(),
            StoredValue {
                data: delta.to_string().into_bytes(),
                expires_at_millis: Self::expiry(now, ttl_if_absent),
            },
        );
        Ok(Counter { value: delta, ttl: ttl_if_absent })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        Ok(Self::live(&mut guard, key, now).map(|v| v.data.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        self.lock().insert(
            key.to_string(),
            StoredValue { data: value, expires_at_millis: Self::expiry(now, ttl) },
        );
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        let current = Self::live(&mut guard, key, now).map(|v| v.data.as_slice());
        if current != expected {
            return Ok(false); // Race detected
        }
        guard.insert(
            key.to_string(),
            StoredValue { data: value, expires_at_millis: Self::expiry(now, ttl) },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        Ok(guard.remove(key).map_or(false, |v| v.expires_at_millis > now))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.lock();
        let mut removed = 0u64;
        guard.retain(|k, v| {
            if k.starts_with(prefix) {
                if v.expires_at_millis > now {
                    removed += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}
