//! Tiered fixed-window rate limiting.
//!
//! Each identity owns one counter per window in the [`SharedStore`]. The counter is created
//! by the first request of a window with an expiry equal to the window length, in the same
//! atomic step as its first increment, so the window resets without any cleanup and every
//! replica sees the same count.
//!
//! Ceilings come from [`TierLimits`] held in a [`DynamicConfig`], so operators can change them
//! without rebuilding the gateway:
//!
//! ```rust
//! use docshield::config::{TierLimit, TierLimits};
//! use docshield::identity::Tier;
//! use docshield::rate_limit::RateLimiter;
//! use docshield::store::InMemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(Arc::new(InMemoryStore::new()), "docs", TierLimits::default());
//! let mut limits = TierLimits::default();
//! limits.public = TierLimit::new(5, Duration::from_secs(60), Tier::Public).unwrap();
//! limiter.set_limits(limits);
//! assert_eq!(limiter.limits().public.ceiling, 5);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::adaptive::DynamicConfig;
use crate::config::{TierLimit, TierLimits};
use crate::error::StoreError;
use crate::identity::ClientIdentity;
use crate::store::SharedStore;

/// The decision returned by [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request is within its ceiling.
    Allow {
        /// Effective ceiling for this window.
        /// Useful for `X-RateLimit-Limit` headers.
        limit: u64,
        /// Requests left in the window after this one.
        remaining: u64,
        /// Time until the window resets.
        reset_after: Duration,
    },
    /// The request exceeded its ceiling.
    Reject {
        /// How long the caller should wait before retrying.
        /// Useful for `Retry-After` headers.
        retry_after: Duration,
        limit: u64,
    },
}

impl Admission {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow { .. })
    }

    pub fn limit(&self) -> u64 {
        match self {
            Admission::Allow { limit, .. } | Admission::Reject { limit, .. } => *limit,
        }
    }
}

/// Fixed-window limiter over a shared store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    namespace: String,
    limits: DynamicConfig<TierLimits>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn SharedStore>, namespace: impl Into<String>, limits: TierLimits) -> Self {
        Self { store, namespace: namespace.into(), limits: DynamicConfig::new(limits) }
    }

    /// Replace the tier ceilings. Windows already open keep their expiry.
    pub fn set_limits(&self, limits: TierLimits) {
        tracing::info!(
            target: "docshield::rate_limit",
            public = limits.public.ceiling,
            demo = limits.demo.ceiling,
            premium = limits.premium.ceiling,
            "tier limits updated"
        );
        self.limits.set(limits);
    }

    pub fn limits(&self) -> Arc<TierLimits> {
        self.limits.get()
    }

    /// Count this request against the identity's window.
    ///
    /// `multiplier` scales the tier ceiling (abuse throttling below 1.0, relaxed limits above).
    /// If the store cannot be reached the request is admitted.
    pub async fn admit(&self, identity: &ClientIdentity, multiplier: f64) -> Admission {
        match self.try_admit(identity, multiplier).await {
            Ok(admission) => admission,
            Err(err) => {
                tracing::warn!(
                    target: "docshield::rate_limit",
                    identity = %identity,
                    error = %err,
                    "rate limit store unavailable; admitting request"
                );
                self.unchecked(identity, multiplier)
            }
        }
    }

    /// Like [`admit`](Self::admit) but surfaces store failures to the caller.
    pub async fn try_admit(
        &self,
        identity: &ClientIdentity,
        multiplier: f64,
    ) -> Result<Admission, StoreError> {
        let tier_limit = self.limits.get().for_tier(identity.tier());
        let limit = effective_ceiling(&tier_limit, multiplier);
        let window = tier_limit.window();

        let counter = self.store.increment(&self.key(identity), 1, window).await?;
        let count = u64::try_from(counter.value).unwrap_or(0);
        // A zero TTL means the window is closing right now.
        let reset_after = if counter.ttl.is_zero() { window } else { counter.ttl };

        if count > limit {
            tracing::debug!(
                target: "docshield::rate_limit",
                identity = %identity,
                count,
                limit,
                retry_after = ?reset_after,
                "rate limit exceeded"
            );
            return Ok(Admission::Reject { retry_after: reset_after, limit });
        }

        Ok(Admission::Allow { limit, remaining: limit - count, reset_after })
    }

    /// The admission granted when the store is unavailable.
    pub fn unchecked(&self, identity: &ClientIdentity, multiplier: f64) -> Admission {
        let tier_limit = self.limits.get().for_tier(identity.tier());
        let limit = effective_ceiling(&tier_limit, multiplier);
        Admission::Allow { limit, remaining: limit, reset_after: tier_limit.window() }
    }

    fn key(&self, identity: &ClientIdentity) -> String {
        format!("{}:rl:{}", self.namespace, identity.id())
    }
}

/// Tier ceiling scaled by `multiplier`, floored, never below one.
pub fn effective_ceiling(limit: &TierLimit, multiplier: f64) -> u64 {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return 1;
    }
    let scaled = (limit.ceiling as f64 * multiplier).floor();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        (scaled as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::identity::Tier;
    use crate::store::InMemoryStore;
    use std::net::{IpAddr, Ipv4Addr};

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new(5_000_000);
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        (RateLimiter::new(Arc::new(store), "t", TierLimits::default()), clock)
    }

    fn anon() -> ClientIdentity {
        ClientIdentity::from_addr(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)))
    }

    #[tokio::test]
    async fn rejects_request_past_ceiling() {
        let (limiter, clock) = limiter();
        let id = anon();
        for n in 1..=30u64 {
            let admission = limiter.admit(&id, 1.0).await;
            assert_eq!(
                admission,
                Admission::Allow { limit: 30, remaining: 30 - n, reset_after: Duration::from_secs(60) }
            );
        }
        clock.advance(Duration::from_secs(15));
        match limiter.admit(&id, 1.0).await {
            Admission::Reject { retry_after, limit } => {
                assert_eq!(limit, 30);
                assert_eq!(retry_after, Duration::from_secs(45));
            }
            other => panic!("expected reject, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn window_expiry_resets_count() {
        let (limiter, clock) = limiter();
        let id = anon();
        for _ in 0..31 {
            limiter.admit(&id, 1.0).await;
        }
        assert!(!limiter.admit(&id, 1.0).await.is_allowed());
        clock.advance(Duration::from_secs(60));
        assert!(limiter.admit(&id, 1.0).await.is_allowed());
    }

    #[tokio::test]
    async fn multiplier_scales_ceiling() {
        let (limiter, _) = limiter();
        let id = anon();
        assert_eq!(limiter.admit(&id, 0.5).await.limit(), 15);
        assert_eq!(limiter.admit(&id, 2.0).await.limit(), 60);
    }

    #[test]
    fn effective_ceiling_floors_and_clamps() {
        let limit = TierLimit { ceiling: 3, window_secs: 60 };
        assert_eq!(effective_ceiling(&limit, 0.5), 1);
        assert_eq!(effective_ceiling(&limit, 0.01), 1);
        assert_eq!(effective_ceiling(&limit, f64::NAN), 1);
        assert_eq!(effective_ceiling(&limit, 1.9), 5);
    }

    #[tokio::test]
    async fn live_limit_updates_apply() {
        let (limiter, _) = limiter();
        let mut limits = TierLimits::default();
        limits.public = TierLimit::new(2, Duration::from_secs(60), Tier::Public).unwrap();
        limiter.set_limits(limits);

        let id = anon();
        assert!(limiter.admit(&id, 1.0).await.is_allowed());
        assert!(limiter.admit(&id, 1.0).await.is_allowed());
        assert!(!limiter.admit(&id, 1.0).await.is_allowed());
    }

    #[tokio::test]
    async fn identities_are_isolated() {
        let (limiter, _) = limiter();
        let a = anon();
        let b = ClientIdentity::from_addr(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 2)));
        for _ in 0..31 {
            limiter.admit(&a, 1.0).await;
        }
        assert!(!limiter.admit(&a, 1.0).await.is_allowed());
        assert!(limiter.admit(&b, 1.0).await.is_allowed());
    }
}
