//! Convenient re-exports for common docshield types.
pub use crate::{
    abuse::{AbuseDetector, Assessment, Verdict},
    cache::{CacheLookup, EdgeCache},
    clock::{Clock, ManualClock, SystemClock},
    coalesce::{CoalesceError, RequestCoalescer, Role},
    config::{
        AbuseConfig, CacheConfig, CoalescerConfig, ConfigError, GatewayConfig, KeyConfig,
        TierLimit, TierLimits,
    },
    gateway::{CacheStatus, Gateway, GatewayRequest, GatewayResponse, RateInfo},
    identity::{ClientIdentity, Tier},
    provider::{DocProvider, ProviderError},
    rate_limit::{Admission, RateLimiter},
    request::{DocRequest, DocResponse, ResourceClass},
    store::{InMemoryStore, SharedStore},
    telemetry::{GatewayEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    GatewayError, ProtectionStats, StoreError,
};
