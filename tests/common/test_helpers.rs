#![allow(dead_code)]

use async_trait::async_trait;
use docshield::prelude::*;
use docshield::store::Counter;
use serde_json::json;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend double that counts fetches and can be told to fail or stall.
#[derive(Debug, Default)]
pub struct CountingProvider {
    calls: AtomicUsize,
    delay: Option<Duration>,
    failing: Mutex<HashSet<String>>,
}

impl CountingProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_path(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn heal_path(&self, path: &str) {
        self.failing.lock().unwrap().remove(path);
    }
}

#[async_trait]
impl DocProvider for CountingProvider {
    async fn fetch(&self, class: ResourceClass, request: DocRequest) -> Result<DocResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(&request.path) {
            return Err(ProviderError::Unreachable(format!("{} is down", request.path)));
        }
        Ok(DocResponse::new(json!({
            "class": class,
            "path": request.path,
            "fetch": n,
        })))
    }
}

/// Store that can be switched into a failing or slow state mid-test.
#[derive(Debug, Clone)]
pub struct FlakyStore {
    inner: InMemoryStore,
    down: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    write_delay_ms: Arc<AtomicU64>,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            down: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
            write_delay_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Round trip added to every operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Extra delay for `set` only.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn pause(counter: &AtomicU64) {
        let ms = counter.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn check(&self) -> Result<(), StoreError> {
        Self::pause(&self.latency_ms).await;
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SharedStore for FlakyStore {
    async fn increment(&self, key: &str, delta: i64, ttl: Duration) -> Result<Counter, StoreError> {
        self.check().await?;
        self.inner.increment(key, delta, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        Self::pause(&self.write_delay_ms).await;
        self.check().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check().await?;
        self.inner.compare_and_swap(key, expected, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check().await?;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.check().await?;
        self.inner.delete_prefix(prefix).await
    }
}

/// A gateway wired to test doubles that share one manual clock.
pub struct Fixture {
    pub gateway: Gateway<MemorySink>,
    pub provider: Arc<CountingProvider>,
    pub store: FlakyStore,
    pub clock: ManualClock,
    pub sink: MemorySink,
}

pub fn fixture() -> Fixture {
    fixture_with(GatewayConfig::default(), CountingProvider::default())
}

pub fn fixture_with(config: GatewayConfig, provider: CountingProvider) -> Fixture {
    let clock = ManualClock::new(1_700_000_000_000);
    let store = FlakyStore::new(InMemoryStore::with_clock(Arc::new(clock.clone())));
    let provider = Arc::new(provider);
    let sink = MemorySink::new();
    let gateway = Gateway::with_clock(config, Arc::new(store.clone()), provider.clone(), Arc::new(clock.clone()))
        .expect("valid config")
        .with_sink(sink.clone());
    Fixture { gateway, provider, store, clock, sink }
}

pub fn addr(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(198, 51, 100, n))
}

pub fn docs(path: &str) -> GatewayRequest {
    GatewayRequest::new(addr(1), DocRequest::new(ResourceClass::Documentation, path))
}
