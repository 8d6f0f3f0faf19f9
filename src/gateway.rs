//! The request pipeline.
//!
//! ```text
//! identity -> abuse detector -> rate limiter -> fingerprint -> edge cache
//!                                                                 | miss
//!                                           coalescer -> DocProvider -> edge cache write
//! ```
//!
//! Blocked and rate-limited requests stop before the cache. Store trouble in the abuse
//! detector or rate limiter admits the request; store trouble in the cache reads as a miss.
//! The shared fetch writes the cache before it releases its in-flight record, and failed
//! fetches are never written.

use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tower::Service;

use crate::abuse::{AbuseDetector, Verdict};
use crate::cache::{CacheLookup, EdgeCache};
use crate::clock::{Clock, SystemClock};
use crate::coalesce::{CoalesceError, RequestCoalescer, Role};
use crate::config::{ConfigError, GatewayConfig, KeyConfig};
use crate::error::GatewayError;
use crate::fingerprint::{Fingerprinter, RequestFingerprint};
use crate::identity::{ClientIdentity, Tier};
use crate::provider::{DocProvider, ProviderError};
use crate::rate_limit::{Admission, RateLimiter};
use crate::request::{DocRequest, DocResponse};
use crate::stats::{ProtectionStats, StatsRecorder};
use crate::store::SharedStore;
use crate::telemetry::{
    emit_best_effort, AbuseEvent, AdmissionEvent, BackendOutcome, CacheEvent, CoalesceEvent,
    GatewayEvent, NullSink, TelemetrySink,
};

/// A documentation read as it arrives at the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
    pub api_key: Option<String>,
    pub remote_addr: IpAddr,
    pub doc: DocRequest,
    /// Skip the cache lookup. Honoured for premium clients only.
    pub force_refresh: bool,
    /// External bot likelihood in `[0, 1]`, if an upstream classifier supplied one.
    pub reputation: Option<f64>,
}

impl GatewayRequest {
    pub fn new(remote_addr: IpAddr, doc: DocRequest) -> Self {
        Self { api_key: None, remote_addr, doc, force_refresh: false, reputation: None }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_reputation(mut self, reputation: f64) -> Self {
        self.reputation = Some(reputation);
        self
    }
}

/// Where the response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// A premium client bypassed the cache and the entry was rewritten.
    Refreshed,
}

/// Rate-limit state after this request, for `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateInfo {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

/// A served response with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub response: DocResponse,
    pub cache: CacheStatus,
    pub fingerprint: RequestFingerprint,
    pub tier: Tier,
    pub rate: RateInfo,
}

struct Inner {
    keys: KeyConfig,
    fingerprinter: Fingerprinter,
    abuse: AbuseDetector,
    limiter: RateLimiter,
    cache: EdgeCache,
    coalescer: RequestCoalescer<DocResponse, ProviderError>,
    provider: Arc<dyn DocProvider>,
    stats: StatsRecorder,
}

/// Protection and caching front for a [`DocProvider`].
///
/// Cheap to clone; clones share state. Emits [`GatewayEvent`]s to its telemetry sink.
#[derive(Clone)]
pub struct Gateway<S = NullSink> {
    inner: Arc<Inner>,
    sink: S,
}

impl<S> std::fmt::Debug for Gateway<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("limiter", &self.inner.limiter)
            .field("cache", &self.inner.cache)
            .field("coalescer", &self.inner.coalescer)
            .finish()
    }
}

impl Gateway<NullSink> {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn SharedStore>,
        provider: Arc<dyn DocProvider>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, provider, Arc::new(SystemClock))
    }

    /// Build a gateway whose TTLs and abuse timing read `clock`.
    pub fn with_clock(
        config: GatewayConfig,
        store: Arc<dyn SharedStore>,
        provider: Arc<dyn DocProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ns = config.namespace.as_str();
        let inner = Inner {
            keys: config.keys.clone(),
            fingerprinter: Fingerprinter::new(&config.cache),
            abuse: AbuseDetector::with_clock(store.clone(), ns, config.abuse.clone(), clock.clone()),
            limiter: RateLimiter::new(store.clone(), ns, config.limits),
            cache: EdgeCache::with_clock(store, ns, config.cache.clone(), clock),
            coalescer: RequestCoalescer::new(config.coalescer.fetch_timeout()),
            provider,
            stats: StatsRecorder::default(),
        };
        Ok(Self { inner: Arc::new(inner), sink: NullSink })
    }
}

impl<S> Gateway<S> {
    /// Replace the telemetry sink.
    pub fn with_sink<S2>(self, sink: S2) -> Gateway<S2>
    where
        S2: TelemetrySink,
    {
        Gateway { inner: self.inner, sink }
    }

    /// The rate limiter, for live tier limit changes.
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.inner.limiter
    }

    pub fn cache(&self) -> &EdgeCache {
        &self.inner.cache
    }
}

impl<S> Gateway<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    /// Serve one documentation read.
    pub async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let inner = &self.inner;
        let identity =
            ClientIdentity::resolve(request.api_key.as_deref(), request.remote_addr, &inner.keys);
        let tier = identity.tier();

        let multiplier = self.screen(&identity, &request).await?;
        let rate = self.admit(&identity, multiplier).await?;

        let fingerprint = inner.fingerprinter.compute(&request.doc, tier);
        let class = fingerprint.class();
        let refresh = request.force_refresh && tier.is_premium();
        if request.force_refresh && !refresh {
            tracing::debug!(
                target: "docshield::gateway",
                identity = %identity,
                "force refresh ignored for non-premium client"
            );
        }

        if refresh {
            self.emit(GatewayEvent::Cache(CacheEvent::Bypassed { class })).await;
        } else {
            let lookup = match inner.cache.try_get(&fingerprint).await {
                Ok(lookup) => lookup,
                Err(err) => {
                    tracing::warn!(
                        target: "docshield::gateway",
                        fingerprint = %fingerprint,
                        error = %err,
                        "cache read failed; fetching from backend"
                    );
                    self.emit(GatewayEvent::StoreDegraded { component: "edge_cache" }).await;
                    CacheLookup::Miss
                }
            };
            if let CacheLookup::Hit { entry, .. } = lookup {
                inner.stats.cache_hit();
                self.emit(GatewayEvent::Cache(CacheEvent::Hit { class })).await;
                return Ok(GatewayResponse {
                    response: entry.response,
                    cache: CacheStatus::Hit,
                    fingerprint,
                    tier,
                    rate,
                });
            }
            inner.stats.cache_miss();
            self.emit(GatewayEvent::Cache(CacheEvent::Miss { class })).await;
        }

        let response = self.fetch(&fingerprint, request.doc).await?;
        Ok(GatewayResponse {
            response,
            cache: if refresh { CacheStatus::Refreshed } else { CacheStatus::Miss },
            fingerprint,
            tier,
            rate,
        })
    }

    /// Drop every cached response. Premium only.
    pub async fn clear_cache(
        &self,
        api_key: Option<&str>,
        remote_addr: IpAddr,
    ) -> Result<u64, GatewayError> {
        self.authorize(api_key, remote_addr, "clear_cache")?;
        let removed = self.inner.cache.invalidate_all().await?;
        self.emit(GatewayEvent::Cache(CacheEvent::Invalidated { removed })).await;
        Ok(removed)
    }

    /// Snapshot the protection counters. Premium only.
    pub async fn protection_stats(
        &self,
        api_key: Option<&str>,
        remote_addr: IpAddr,
    ) -> Result<ProtectionStats, GatewayError> {
        self.authorize(api_key, remote_addr, "protection_stats")?;
        Ok(self.inner.stats.snapshot(self.inner.coalescer.in_flight()))
    }

    /// Abuse screening; returns the ceiling multiplier for the rate limiter.
    async fn screen(
        &self,
        identity: &ClientIdentity,
        request: &GatewayRequest,
    ) -> Result<f64, GatewayError> {
        let assessment = self
            .inner
            .abuse
            .assess(identity, &request.doc.tracking_path(), request.reputation)
            .await;
        if assessment.degraded {
            self.emit(GatewayEvent::StoreDegraded { component: "abuse_detector" }).await;
        }
        for flag in &assessment.flags {
            self.emit(GatewayEvent::Abuse(AbuseEvent::Flagged { flag: *flag, score: assessment.trust }))
                .await;
        }

        match assessment.verdict {
            Verdict::Block { remaining, .. } => {
                self.inner.stats.blocked();
                let event = match assessment.new_cooldown {
                    Some(cooldown) => AbuseEvent::Blocked { cooldown, offences: assessment.offences },
                    None => AbuseEvent::Rejected { remaining },
                };
                self.emit(GatewayEvent::Abuse(event)).await;
                Err(GatewayError::Blocked { remaining })
            }
            Verdict::Throttle { factor } => {
                self.inner.stats.throttled();
                self.emit(GatewayEvent::Abuse(AbuseEvent::Throttled { factor })).await;
                Ok(factor)
            }
            Verdict::Allow { ceiling_multiplier } => Ok(ceiling_multiplier),
        }
    }

    async fn admit(&self, identity: &ClientIdentity, multiplier: f64) -> Result<RateInfo, GatewayError> {
        let limiter = &self.inner.limiter;
        let admission = match limiter.try_admit(identity, multiplier).await {
            Ok(admission) => admission,
            Err(err) => {
                tracing::warn!(
                    target: "docshield::gateway",
                    identity = %identity,
                    error = %err,
                    "rate limit store unavailable; admitting request"
                );
                self.emit(GatewayEvent::StoreDegraded { component: "rate_limiter" }).await;
                limiter.unchecked(identity, multiplier)
            }
        };

        let tier = identity.tier();
        match admission {
            Admission::Allow { limit, remaining, reset_after } => {
                self.inner.stats.allowed();
                self.emit(GatewayEvent::Admission(AdmissionEvent::Allowed { tier, remaining })).await;
                Ok(RateInfo { limit, remaining, reset_after })
            }
            Admission::Reject { retry_after, limit } => {
                self.inner.stats.rate_limited();
                self.emit(GatewayEvent::Admission(AdmissionEvent::RateLimited { tier, retry_after }))
                    .await;
                Err(GatewayError::RateLimited { retry_after, limit })
            }
        }
    }

    async fn fetch(
        &self,
        fingerprint: &RequestFingerprint,
        doc: DocRequest,
    ) -> Result<DocResponse, GatewayError> {
        let inner = &self.inner;
        let start = Instant::now();

        // The cache write runs inside the shared fetch, so it lands before the in-flight record
        // is released and even when the leading caller has gone away.
        let task = FetchTask {
            inner: inner.clone(),
            sink: self.sink.clone(),
            fingerprint: fingerprint.clone(),
        };
        let (role, outcome) = inner.coalescer.fetch(fingerprint, move || task.run(doc)).await;
        let duration = start.elapsed();

        let event = match role {
            Role::Leader => CoalesceEvent::Leader,
            Role::Follower => {
                inner.stats.coalesced_wait();
                CoalesceEvent::Joined
            }
        };
        self.emit(GatewayEvent::Coalesce(event)).await;

        match outcome {
            Ok(response) => {
                self.emit(GatewayEvent::Backend(BackendOutcome::Success { duration })).await;
                Ok(response)
            }
            Err(err) => {
                // Provider failures are counted by the fetch itself.
                if role == Role::Leader && !matches!(err, CoalesceError::Failed(_)) {
                    inner.stats.backend_error();
                }
                if let CoalesceError::Timeout { timeout, .. } = &err {
                    self.emit(GatewayEvent::Coalesce(CoalesceEvent::TimedOut { timeout: *timeout }))
                        .await;
                }
                self.emit(GatewayEvent::Backend(BackendOutcome::Failure { duration })).await;
                tracing::warn!(
                    target: "docshield::gateway",
                    fingerprint = %fingerprint,
                    error = %err,
                    "backend fetch failed"
                );
                Err(GatewayError::BackendUnavailable { reason: err.to_string() })
            }
        }
    }

    fn authorize(
        &self,
        api_key: Option<&str>,
        remote_addr: IpAddr,
        operation: &'static str,
    ) -> Result<ClientIdentity, GatewayError> {
        let identity = ClientIdentity::resolve(api_key, remote_addr, &self.inner.keys);
        if !identity.tier().is_premium() {
            tracing::info!(
                target: "docshield::gateway",
                identity = %identity,
                operation,
                "admin operation refused"
            );
            return Err(GatewayError::Forbidden { operation });
        }
        Ok(identity)
    }

    async fn emit(&self, event: GatewayEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

impl<S> Service<GatewayRequest> for Gateway<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    type Response = GatewayResponse;
    type Error = GatewayError;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: GatewayRequest) -> Self::Future {
        let gateway = self.clone();
        Box::pin(async move { gateway.handle(request).await })
    }
}

/// One backend fetch plus its cache write, run on the coalescer's task.
struct FetchTask<S> {
    inner: Arc<Inner>,
    sink: S,
    fingerprint: RequestFingerprint,
}

impl<S> FetchTask<S>
where
    S: TelemetrySink + Sync,
    S::Future: Send + 'static,
{
    async fn run(self, doc: DocRequest) -> Result<DocResponse, ProviderError> {
        let class = self.fingerprint.class();
        let response = match self.inner.provider.fetch(class, doc).await {
            Ok(response) => response,
            Err(err) => {
                self.inner.stats.backend_error();
                return Err(err);
            }
        };

        match self.inner.cache.try_put(&self.fingerprint, response.clone()).await {
            Ok(_) => {
                let ttl = self.inner.cache.ttl_for(class);
                let event = GatewayEvent::Cache(CacheEvent::Stored { class, ttl });
                emit_best_effort(self.sink.clone(), event).await;
            }
            Err(err) => {
                tracing::warn!(
                    target: "docshield::gateway",
                    fingerprint = %self.fingerprint,
                    error = %err,
                    "cache write failed"
                );
                let event = GatewayEvent::StoreDegraded { component: "edge_cache" };
                emit_best_effort(self.sink.clone(), event).await;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::request::ResourceClass;
    use crate::store::InMemoryStore;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DocProvider for Counting {
        async fn fetch(&self, class: ResourceClass, request: DocRequest) -> Result<DocResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if request.path == "broken" {
                return Err(ProviderError::Status { status: 502 });
            }
            Ok(DocResponse::new(json!({ "class": class, "path": request.path, "n": n })))
        }
    }

    fn gateway() -> (Gateway<MemorySink>, Arc<Counting>, ManualClock, MemorySink) {
        let clock = ManualClock::new(50_000_000);
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let provider = Arc::new(Counting::default());
        let sink = MemorySink::new();
        let gateway = Gateway::with_clock(
            GatewayConfig::default(),
            Arc::new(store),
            provider.clone(),
            Arc::new(clock.clone()),
        )
        .unwrap()
        .with_sink(sink.clone());
        (gateway, provider, clock, sink)
    }

    fn addr() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(203, 0, 113, 50))
    }

    fn docs(path: &str) -> GatewayRequest {
        GatewayRequest::new(addr(), DocRequest::new(ResourceClass::Documentation, path))
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let (gateway, provider, clock, sink) = gateway();
        let first = gateway.handle(docs("react")).await.unwrap();
        assert_eq!(first.cache, CacheStatus::Miss);
        assert_eq!(first.rate.limit, 30);
        assert_eq!(first.rate.remaining, 29);

        clock.advance(Duration::from_secs(1));
        let second = gateway.handle(docs("react")).await.unwrap();
        assert_eq!(second.cache, CacheStatus::Hit);
        assert_eq!(second.response, first.response);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let events = sink.events();
        assert!(events.contains(&GatewayEvent::Cache(CacheEvent::Hit {
            class: ResourceClass::Documentation
        })));
        assert!(events.contains(&GatewayEvent::Coalesce(CoalesceEvent::Leader)));
    }

    #[tokio::test]
    async fn premium_force_refresh_bypasses_cache() {
        let (gateway, provider, clock, _) = gateway();
        let premium = |r: GatewayRequest| r.with_api_key("premium_abc");
        gateway.handle(premium(docs("react"))).await.unwrap();
        clock.advance(Duration::from_secs(1));

        let refreshed = gateway.handle(premium(docs("react")).force_refresh()).await.unwrap();
        assert_eq!(refreshed.cache, CacheStatus::Refreshed);
        assert_eq!(refreshed.response.body["n"], 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        // The refreshed entry replaces the old one.
        clock.advance(Duration::from_secs(1));
        let cached = gateway.handle(docs("react")).await.unwrap();
        assert_eq!(cached.cache, CacheStatus::Hit);
        assert_eq!(cached.response.body["n"], 1);
    }

    #[tokio::test]
    async fn force_refresh_ignored_for_public() {
        let (gateway, provider, clock, _) = gateway();
        gateway.handle(docs("vue")).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let again = gateway.handle(docs("vue").force_refresh()).await.unwrap();
        assert_eq!(again.cache, CacheStatus::Hit);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_failure_is_not_cached() {
        let (gateway, provider, clock, _) = gateway();
        let err = gateway.handle(docs("broken")).await.unwrap_err();
        assert!(err.is_backend_unavailable());

        clock.advance(Duration::from_secs(1));
        let err = gateway.handle(docs("broken")).await.unwrap_err();
        assert!(err.is_backend_unavailable());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn admin_operations_require_premium() {
        let (gateway, _, _, _) = gateway();
        let err = gateway.clear_cache(None, addr()).await.unwrap_err();
        assert_eq!(err, GatewayError::Forbidden { operation: "clear_cache" });
        let err = gateway.protection_stats(Some("demo_x"), addr()).await.unwrap_err();
        assert!(err.is_forbidden());

        gateway.handle(docs("react")).await.unwrap();
        assert_eq!(gateway.clear_cache(Some("premium_ops"), addr()).await.unwrap(), 1);

        let stats = gateway.protection_stats(Some("premium_ops"), addr()).await.unwrap();
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn service_impl_serves_requests() {
        use tower::ServiceExt;
        let (gateway, _, _, _) = gateway();
        let response = gateway.oneshot(docs("svelte")).await.unwrap();
        assert_eq!(response.tier, Tier::Public);
        assert_eq!(response.response.body["path"], "svelte");
    }
}
