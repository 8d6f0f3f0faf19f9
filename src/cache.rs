//! Edge cache for documentation responses.
//!
//! Entries live in the [`SharedStore`] under the request fingerprint, so every replica serves
//! what any replica fetched. The TTL is fixed per [`ResourceClass`] when the entry is written
//! and checked again on every read against the injected clock, so an entry is never served
//! past its expiry even if the store has not evicted it yet.
//!
//! An optional process-local layer (moka) can sit in front of the store. It follows the same
//! expiry rule and is cleared together with the shared entries.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::fingerprint::RequestFingerprint;
use crate::request::{DocResponse, ResourceClass};
use crate::store::SharedStore;

/// A cached backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: DocResponse,
    pub class: ResourceClass,
    pub created_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn expires_at_ms(&self) -> u64 {
        self.created_at_ms.saturating_add(self.ttl_ms)
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        self.expires_at_ms() > now_ms
    }

    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.expires_at_ms().saturating_sub(now_ms))
    }
}

/// Result of [`EdgeCache::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit {
        entry: CacheEntry,
        /// Hits recorded for this entry, including this one. Zero if the counter was unavailable.
        hits: u64,
    },
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit { .. })
    }
}

/// Shared response cache keyed by [`RequestFingerprint`].
#[derive(Clone)]
pub struct EdgeCache {
    store: Arc<dyn SharedStore>,
    namespace: String,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    local: Option<Cache<String, CacheEntry>>,
}

impl std::fmt::Debug for EdgeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeCache")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .field("local", &self.local.as_ref().map(|c| c.entry_count()))
            .finish()
    }
}

impl EdgeCache {
    pub fn new(store: Arc<dyn SharedStore>, namespace: impl Into<String>, config: CacheConfig) -> Self {
        Self::with_clock(store, namespace, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SharedStore>,
        namespace: impl Into<String>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let local = config.local_ttl_ms.map(|ttl| {
            Cache::builder()
                .max_capacity(config.local_capacity)
                .time_to_live(Duration::from_millis(ttl))
                .build()
        });
        Self { store, namespace: namespace.into(), config, clock, local }
    }

    /// Look up a fingerprint. Store failures and undecodable entries read as a miss.
    pub async fn get(&self, fingerprint: &RequestFingerprint) -> CacheLookup {
        match self.try_get(fingerprint).await {
            Ok(lookup) => lookup,
            Err(err) => {
                tracing::warn!(
                    target: "docshield::cache",
                    fingerprint = %fingerprint,
                    error = %err,
                    "cache read failed; treating as miss"
                );
                CacheLookup::Miss
            }
        }
    }

    pub async fn try_get(&self, fingerprint: &RequestFingerprint) -> Result<CacheLookup, StoreError> {
        let now = self.clock.now_millis();
        let key = self.entry_key(fingerprint);

        if let Some(local) = &self.local {
            match local.get(&key) {
                Some(entry) if entry.is_fresh(now) => {
                    let hits = self.record_hit(fingerprint, &entry, now).await;
                    return Ok(CacheLookup::Hit { entry, hits });
                }
                Some(_) => local.invalidate(&key),
                None => {}
            }
        }

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(CacheLookup::Miss);
        };
        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    target: "docshield::cache",
                    fingerprint = %fingerprint,
                    error = %err,
                    "discarding undecodable cache entry"
                );
                return Ok(CacheLookup::Miss);
            }
        };
        if !entry.is_fresh(now) {
            return Ok(CacheLookup::Miss);
        }

        if let Some(local) = &self.local {
            local.insert(key, entry.clone());
        }
        let hits = self.record_hit(fingerprint, &entry, now).await;
        Ok(CacheLookup::Hit { entry, hits })
    }

    /// Store a response under its class TTL. Write failures are logged and dropped.
    pub async fn put(&self, fingerprint: &RequestFingerprint, response: DocResponse) -> Option<CacheEntry> {
        match self.try_put(fingerprint, response).await {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(
                    target: "docshield::cache",
                    fingerprint = %fingerprint,
                    error = %err,
                    "cache write failed"
                );
                None
            }
        }
    }

    pub async fn try_put(
        &self,
        fingerprint: &RequestFingerprint,
        response: DocResponse,
    ) -> Result<CacheEntry, StoreError> {
        let class = fingerprint.class();
        let ttl = self.config.ttl_for(class);
        let entry = CacheEntry {
            response,
            class,
            created_at_ms: self.clock.now_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let key = self.entry_key(fingerprint);
        let encoded = serde_json::to_vec(&entry)
            .map_err(|e| StoreError::Malformed { key: key.clone(), reason: e.to_string() })?;

        self.store.set(&key, encoded, ttl).await?;
        // A fresh entry starts a fresh hit count. The entry is stored either way.
        if let Err(err) = self.store.delete(&self.hits_key(fingerprint)).await {
            tracing::debug!(
                target: "docshield::cache",
                fingerprint = %fingerprint,
                error = %err,
                "hit counter reset failed"
            );
        }
        if let Some(local) = &self.local {
            local.insert(key, entry.clone());
        }
        tracing::debug!(
            target: "docshield::cache",
            fingerprint = %fingerprint,
            ttl = ?ttl,
            "cached response"
        );
        Ok(entry)
    }

    /// Drop every entry and hit counter in this namespace.
    pub async fn invalidate_all(&self) -> Result<u64, StoreError> {
        if let Some(local) = &self.local {
            local.invalidate_all();
        }
        let removed = self.store.delete_prefix(&self.entry_prefix()).await?;
        self.store.delete_prefix(&self.hits_prefix()).await?;
        tracing::info!(target: "docshield::cache", removed, "cache invalidated");
        Ok(removed)
    }

    pub fn ttl_for(&self, class: ResourceClass) -> Duration {
        self.config.ttl_for(class)
    }

    async fn record_hit(&self, fingerprint: &RequestFingerprint, entry: &CacheEntry, now: u64) -> u64 {
        let remaining = entry.remaining(now).max(Duration::from_millis(1));
        match self.store.increment(&self.hits_key(fingerprint), 1, remaining).await {
            Ok(counter) => u64::try_from(counter.value).unwrap_or(0),
            Err(err) => {
                tracing::debug!(
                    target: "docshield::cache",
                    fingerprint = %fingerprint,
                    error = %err,
                    "hit counter unavailable"
                );
                0
            }
        }
    }

    fn entry_prefix(&self) -> String {
        format!("{}:cache:", self.namespace)
    }

    fn hits_prefix(&self) -> String {
        format!("{}:hits:", self.namespace)
    }

    fn entry_key(&self, fingerprint: &RequestFingerprint) -> String {
        format!("{}{}", self.entry_prefix(), fingerprint)
    }

    fn hits_key(&self, fingerprint: &RequestFingerprint) -> String {
        format!("{}{}", self.hits_prefix(), fingerprint)
    }
}
