//! Behavioural abuse detection with escalating cool-downs.
//!
//! Every identity has an *abuse profile* in the shared store: a bounded trust score, the
//! number of offences so far, the current block expiry, the time of the last request and a
//! short window of recently requested paths. Each request updates the profile with one
//! optimistic compare-and-swap, retried a bounded number of times.
//!
//! Two plain counters sit beside the profile. The burst counter lives for
//! `rapid_fire_threshold` and catches requests that arrive in parallel. The violation counter
//! records every flag with an atomic increment, so penalties survive lost compare-and-swap
//! races and are folded into the trust score by whichever write lands next.
//!
//! Signals:
//! - **rapid fire**: the previous request arrived less than `rapid_fire_threshold` ago, or
//!   another request is still inside the current burst window
//! - **sequential scan**: the last `scan_window` paths share a prefix and end in numbers that
//!   step by a constant non-zero amount (`/docs/page/1`, `/docs/page/2`, ...)
//!
//! Each signal costs `violation_penalty` trust. Clean requests earn `clean_reward` at most
//! once per `clean_period`. Reaching `block_threshold` blocks the identity for
//! `base_cooldown × 2^(offences-1)`, capped at `max_cooldown`; when the cool-down lapses the
//! trust score starts over from `initial_score` but the offence count is kept.
//!
//! An external bot-likelihood in `[0, 1]` lowers the *effective* score used for throttling.
//! It never blocks on its own and is never persisted.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::AbuseConfig;
use crate::error::StoreError;
use crate::identity::ClientIdentity;
use crate::store::SharedStore;

/// A behavioural signal that cost trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbuseFlag {
    RapidFire,
    SequentialScan,
}

impl fmt::Display for AbuseFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbuseFlag::RapidFire => f.write_str("rapid_fire"),
            AbuseFlag::SequentialScan => f.write_str("sequential_scan"),
        }
    }
}

/// What the gateway should do with the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Admit, scaling the tier ceiling by `ceiling_multiplier` (1.0 normally, more when trusted).
    Allow { ceiling_multiplier: f64 },
    /// Admit with the ceiling scaled down by `factor`.
    Throttle { factor: f64 },
    /// Reject until `until_ms` (epoch milliseconds).
    Block { until_ms: u64, remaining: Duration },
}

impl Verdict {
    /// Multiplier to hand to the rate limiter, or `None` when blocked.
    pub fn ceiling_multiplier(&self) -> Option<f64> {
        match self {
            Verdict::Allow { ceiling_multiplier } => Some(*ceiling_multiplier),
            Verdict::Throttle { factor } => Some(*factor),
            Verdict::Block { .. } => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }
}

/// Persisted per-identity state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbuseProfile {
    pub trust: i64,
    pub offences: u32,
    #[serde(default)]
    pub blocked_until_ms: Option<u64>,
    #[serde(default)]
    pub last_seen_ms: Option<u64>,
    pub last_reward_ms: u64,
    #[serde(default)]
    pub recent_paths: VecDeque<String>,
    /// Value of the violation counter already folded into `trust`.
    #[serde(default)]
    pub violations_applied: i64,
}

impl AbuseProfile {
    fn fresh(config: &AbuseConfig, now_ms: u64) -> Self {
        Self {
            trust: config.initial_score,
            offences: 0,
            blocked_until_ms: None,
            last_seen_ms: None,
            last_reward_ms: now_ms,
            recent_paths: VecDeque::new(),
            violations_applied: 0,
        }
    }
}

struct Observation {
    profile: AbuseProfile,
    flags: Vec<AbuseFlag>,
    /// A lapsed block was just cleared.
    restarted: bool,
}

/// Full outcome of one evaluation, for callers that report on it.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    /// Signals raised by this request.
    pub flags: Vec<AbuseFlag>,
    /// Trust after this request.
    pub trust: i64,
    pub offences: u32,
    /// Set when this request started a new cool-down.
    pub new_cooldown: Option<Duration>,
    /// The profile could not be read or written; the request was allowed unconditionally.
    pub degraded: bool,
}

impl Assessment {
    fn fail_open() -> Self {
        Self {
            verdict: Verdict::Allow { ceiling_multiplier: 1.0 },
            flags: Vec::new(),
            trust: 0,
            offences: 0,
            new_cooldown: None,
            degraded: true,
        }
    }
}

/// Scores request behaviour and decides allow, throttle or block.
#[derive(Debug, Clone)]
pub struct AbuseDetector {
    store: Arc<dyn SharedStore>,
    namespace: String,
    config: AbuseConfig,
    clock: Arc<dyn Clock>,
}

impl AbuseDetector {
    pub fn new(store: Arc<dyn SharedStore>, namespace: impl Into<String>, config: AbuseConfig) -> Self {
        Self::with_clock(store, namespace, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn SharedStore>,
        namespace: impl Into<String>,
        config: AbuseConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, namespace: namespace.into(), config, clock }
    }

    pub fn config(&self) -> &AbuseConfig {
        &self.config
    }

    /// Evaluate a request at the current clock time.
    pub async fn evaluate(
        &self,
        identity: &ClientIdentity,
        path: &str,
        reputation: Option<f64>,
    ) -> Verdict {
        self.assess(identity, path, reputation).await.verdict
    }

    /// Evaluate and return the full [`Assessment`], failing open on store trouble.
    pub async fn assess(
        &self,
        identity: &ClientIdentity,
        path: &str,
        reputation: Option<f64>,
    ) -> Assessment {
        let now = self.clock.now_millis();
        match self.assess_at(identity, path, now, reputation).await {
            Ok(assessment) => assessment,
            Err(err) => {
                tracing::warn!(
                    target: "docshield::abuse",
                    identity = %identity,
                    error = %err,
                    "abuse profile update failed; allowing request"
                );
                Assessment::fail_open()
            }
        }
    }

    /// Evaluate a request observed at `now_ms`, surfacing store failures.
    ///
    /// Flags are charged to the identity's violation counter with an atomic increment before
    /// the profile write is attempted, so a request that loses every compare-and-swap race still
    /// costs trust: the next write that lands folds the outstanding violations in.
    pub async fn assess_at(
        &self,
        identity: &ClientIdentity,
        path: &str,
        now_ms: u64,
        reputation: Option<f64>,
    ) -> Result<Assessment, StoreError> {
        let key = self.key(identity);
        let attempts = self.config.max_update_attempts.max(1);
        let mut in_burst: Option<bool> = None;
        let mut charged = 0usize;
        let mut attempt = 0usize;

        // Optimistic locking loop
        loop {
            let current = self.store.get(&key).await?;
            let profile = self.decode(identity, current.as_deref());
            let active_block = profile.as_ref().and_then(|p| p.blocked_until_ms).filter(|u| *u > now_ms);
            if let Some(until) = active_block {
                // Still cooling down; nothing to record.
                return Ok(self.blocked(until, now_ms, profile.as_ref()));
            }

            let burst = match in_burst {
                Some(burst) => burst,
                None => {
                    let counter = self
                        .store
                        .increment(&self.burst_key(identity), 1, self.config.rapid_fire_threshold())
                        .await?;
                    let burst = counter.value > 1;
                    in_burst = Some(burst);
                    burst
                }
            };

            let observation = self.observe(profile, path, now_ms, burst);
            let extra = observation.flags.len().saturating_sub(charged);
            let violations = self
                .store
                .increment(&self.violations_key(identity), extra as i64, self.config.profile_ttl())
                .await?
                .value;
            charged += extra;

            let (updated, assessment) = self.settle(observation, violations, now_ms, reputation);
            let encoded = serde_json::to_vec(&updated).map_err(|e| StoreError::Malformed {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            if self
                .store
                .compare_and_swap(&key, current.as_deref(), encoded, self.config.profile_ttl())
                .await?
            {
                self.log(identity, &assessment);
                return Ok(assessment);
            }

            // Race detected, loop again
            attempt += 1;
            if attempt >= attempts {
                tracing::debug!(
                    target: "docshield::abuse",
                    identity = %identity,
                    attempts,
                    "abuse profile contended; violations stay charged"
                );
                return Ok(assessment);
            }
        }
    }

    /// Apply the request to the profile and work out its own flags.
    fn observe(
        &self,
        profile: Option<AbuseProfile>,
        path: &str,
        now_ms: u64,
        in_burst: bool,
    ) -> Observation {
        let cfg = &self.config;
        let mut restarted = false;
        let mut profile = profile.unwrap_or_else(|| AbuseProfile::fresh(cfg, now_ms));

        if profile.blocked_until_ms.take().is_some() {
            restarted = true;
            profile.trust = cfg.initial_score;
            profile.last_seen_ms = None;
            profile.last_reward_ms = now_ms;
            profile.recent_paths.clear();
        }

        let mut flags = Vec::new();
        let since_last =
            profile.last_seen_ms.map(|last| Duration::from_millis(now_ms.saturating_sub(last)));
        if in_burst || since_last.map_or(false, |gap| gap < cfg.rapid_fire_threshold()) {
            flags.push(AbuseFlag::RapidFire);
        }

        profile.recent_paths.push_back(path.to_string());
        while profile.recent_paths.len() > cfg.path_history {
            profile.recent_paths.pop_front();
        }
        if is_sequential_scan(&profile.recent_paths, cfg.scan_window) {
            flags.push(AbuseFlag::SequentialScan);
        }
        profile.last_seen_ms = Some(now_ms);

        Observation { profile, flags, restarted }
    }

    /// Fold outstanding violations into the trust score and decide.
    fn settle(
        &self,
        observation: Observation,
        violations: i64,
        now_ms: u64,
        reputation: Option<f64>,
    ) -> (AbuseProfile, Assessment) {
        let cfg = &self.config;
        let Observation { mut profile, flags, restarted } = observation;

        // Violations charged before a block lapsed were paid for by the block.
        let pending = if restarted {
            flags.len() as i64
        } else if violations >= profile.violations_applied {
            violations - profile.violations_applied
        } else {
            // The counter expired and started over.
            violations.max(0)
        };
        profile.violations_applied = violations;

        if pending == 0 {
            let clean_period = u64::try_from(cfg.clean_period().as_millis()).unwrap_or(u64::MAX);
            if now_ms.saturating_sub(profile.last_reward_ms) >= clean_period {
                profile.trust = self.clamp(profile.trust.saturating_add(cfg.clean_reward));
                profile.last_reward_ms = now_ms;
            }
        } else {
            let penalty = cfg.violation_penalty.saturating_mul(pending);
            profile.trust = self.clamp(profile.trust.saturating_sub(penalty));
            profile.last_reward_ms = now_ms;
        }

        let mut new_cooldown = None;
        let verdict = if profile.trust <= cfg.block_threshold {
            profile.offences = profile.offences.saturating_add(1);
            let cooldown = self.cooldown_for(profile.offences);
            let until = now_ms.saturating_add(u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX));
            profile.blocked_until_ms = Some(until);
            new_cooldown = Some(cooldown);
            Verdict::Block { until_ms: until, remaining: cooldown }
        } else {
            let reputation = reputation.filter(|r| r.is_finite()).unwrap_or(0.0).clamp(0.0, 1.0);
            let effective = profile.trust as f64 - reputation * cfg.reputation_weight;
            if effective < cfg.throttle_threshold as f64 {
                Verdict::Throttle { factor: cfg.throttle_factor }
            } else if profile.trust >= cfg.relaxed_threshold {
                Verdict::Allow { ceiling_multiplier: cfg.relaxed_multiplier }
            } else {
                Verdict::Allow { ceiling_multiplier: 1.0 }
            }
        };

        let assessment = Assessment {
            verdict,
            flags,
            trust: profile.trust,
            offences: profile.offences,
            new_cooldown,
            degraded: false,
        };
        (profile, assessment)
    }

    /// `base × 2^(offences-1)`, capped.
    pub fn cooldown_for(&self, offences: u32) -> Duration {
        let base = self.config.base_cooldown();
        let max = self.config.max_cooldown();
        let exponent = offences.saturating_sub(1).min(31);
        base.checked_mul(1u32 << exponent).map_or(max, |d| d.min(max))
    }

    fn blocked(&self, until: u64, now_ms: u64, profile: Option<&AbuseProfile>) -> Assessment {
        Assessment {
            verdict: Verdict::Block {
                until_ms: until,
                remaining: Duration::from_millis(until.saturating_sub(now_ms)),
            },
            flags: Vec::new(),
            trust: profile.map_or(self.config.min_score, |p| p.trust),
            offences: profile.map_or(0, |p| p.offences),
            new_cooldown: None,
            degraded: false,
        }
    }

    fn decode(&self, identity: &ClientIdentity, raw: Option<&[u8]>) -> Option<AbuseProfile> {
        match serde_json::from_slice::<AbuseProfile>(raw?) {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(
                    target: "docshield::abuse",
                    identity = %identity,
                    error = %err,
                    "discarding unreadable abuse profile"
                );
                None
            }
        }
    }

    fn clamp(&self, score: i64) -> i64 {
        score.clamp(self.config.min_score, self.config.max_score)
    }

    fn log(&self, identity: &ClientIdentity, assessment: &Assessment) {
        if let Some(cooldown) = assessment.new_cooldown {
            tracing::warn!(
                target: "docshield::abuse",
                identity = %identity,
                offences = assessment.offences,
                cooldown = ?cooldown,
                "identity blocked"
            );
        } else if !assessment.flags.is_empty() {
            tracing::debug!(
                target: "docshield::abuse",
                identity = %identity,
                flags = ?assessment.flags,
                trust = assessment.trust,
                "suspicious request"
            );
        }
    }

    fn key(&self, identity: &ClientIdentity) -> String {
        format!("{}:abuse:{}", self.namespace, identity.id())
    }

    fn violations_key(&self, identity: &ClientIdentity) -> String {
        format!("{}:violations:{}", self.namespace, identity.id())
    }

    fn burst_key(&self, identity: &ClientIdentity) -> String {
        format!("{}:burst:{}", self.namespace, identity.id())
    }
}

/// True when the newest `window` paths share a prefix and their trailing numbers step evenly.
pub fn is_sequential_scan(paths: &VecDeque<String>, window: usize) -> bool {
    if window < 2 || paths.len() < window {
        return false;
    }
    let mut split = paths.iter().skip(paths.len() - window).map(|p| split_trailing_number(p));

    let Some(Some((prefix, first))) = split.next() else {
        return false;
    };
    let mut previous = first;
    let mut step: Option<i128> = None;
    for item in split {
        let Some((p, n)) = item else {
            return false;
        };
        if p != prefix {
            return false;
        }
        let delta = n - previous;
        if delta == 0 {
            return false;
        }
        match step {
            Some(s) if s != delta => return false,
            _ => step = Some(delta),
        }
        previous = n;
    }
    true
}

fn split_trailing_number(path: &str) -> Option<(&str, i128)> {
    let path = path.trim_end_matches('/');
    let digits = path.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 || digits > 30 {
        return None;
    }
    let (prefix, number) = path.split_at(path.len() - digits);
    if prefix.is_empty() {
        return None;
    }
    number.parse().ok().map(|n| (prefix, n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;
    use std::net::{IpAddr, Ipv4Addr};

    fn detector() -> (AbuseDetector, ManualClock) {
        let clock = ManualClock::new(10_000_000);
        let store = InMemoryStore::with_clock(Arc::new(clock.clone()));
        let detector = AbuseDetector::with_clock(
            Arc::new(store),
            "t",
            AbuseConfig::default(),
            Arc::new(clock.clone()),
        );
        (detector, clock)
    }

    fn client() -> ClientIdentity {
        ClientIdentity::from_addr(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9)))
    }

    async fn hammer(detector: &AbuseDetector, clock: &ManualClock, n: usize) -> Verdict {
        let mut last = Verdict::Allow { ceiling_multiplier: 1.0 };
        for _ in 0..n {
            clock.advance(Duration::from_millis(10));
            last = detector.evaluate(&client(), "/documentation/react", None).await;
        }
        last
    }

    #[tokio::test]
    async fn paced_requests_are_allowed() {
        let (detector, clock) = detector();
        for _ in 0..10 {
            clock.advance(Duration::from_secs(1));
            let verdict = detector.evaluate(&client(), "/documentation/react", None).await;
            assert_eq!(verdict, Verdict::Allow { ceiling_multiplier: 1.0 });
        }
    }

    #[tokio::test]
    async fn five_rapid_flags_block() {
        let (detector, clock) = detector();
        // The first request has no predecessor, so six requests raise five flags.
        let verdict = hammer(&detector, &clock, 6).await;
        match verdict {
            Verdict::Block { remaining, .. } => assert_eq!(remaining, Duration::from_secs(60)),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn low_trust_throttles_before_blocking() {
        let (detector, clock) = detector();
        let verdict = hammer(&detector, &clock, 4).await;
        assert_eq!(verdict, Verdict::Throttle { factor: 0.5 });
    }

    #[tokio::test]
    async fn cooldown_expires_and_doubles_on_repeat() {
        let (detector, clock) = detector();
        assert!(hammer(&detector, &clock, 6).await.is_blocked());

        clock.advance(Duration::from_secs(30));
        let still = detector.evaluate(&client(), "/documentation/react", None).await;
        match still {
            Verdict::Block { remaining, .. } => assert!(remaining <= Duration::from_secs(30)),
            other => panic!("expected block, got {:?}", other),
        }

        clock.advance(Duration::from_secs(31));
        let after = detector.assess(&client(), "/documentation/react", None).await;
        assert_eq!(after.verdict, Verdict::Allow { ceiling_multiplier: 1.0 });
        assert_eq!(after.trust, 50);

        // Five more flags from a reset score.
        let second = hammer(&detector, &clock, 5).await;
        match second {
            Verdict::Block { remaining, .. } => assert_eq!(remaining, Duration::from_secs(120)),
            other => panic!("expected block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sequential_paths_are_flagged() {
        let (detector, clock) = detector();
        let mut last = None;
        for page in 1..=4 {
            clock.advance(Duration::from_secs(2));
            let path = format!("/documentation/react/page/{}", page);
            last = Some(detector.assess(&client(), &path, None).await);
        }
        let last = last.unwrap();
        assert_eq!(last.flags, vec![AbuseFlag::SequentialScan]);
        assert_eq!(last.trust, 40);
    }

    #[tokio::test]
    async fn reputation_throttles_but_never_blocks() {
        let (detector, clock) = detector();
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            let verdict = detector.evaluate(&client(), "/search/react", Some(1.0)).await;
            assert_eq!(verdict, Verdict::Throttle { factor: 0.5 });
        }
    }

    #[tokio::test]
    async fn sustained_good_behaviour_relaxes_ceiling() {
        let (detector, clock) = detector();
        let mut verdict = Verdict::Allow { ceiling_multiplier: 1.0 };
        for _ in 0..31 {
            clock.advance(Duration::from_secs(60));
            verdict = detector.evaluate(&client(), "/documentation/react", None).await;
        }
        assert_eq!(verdict, Verdict::Allow { ceiling_multiplier: 2.0 });
    }

    #[test]
    fn cooldown_caps_at_max() {
        let (detector, _) = detector();
        assert_eq!(detector.cooldown_for(1), Duration::from_secs(60));
        assert_eq!(detector.cooldown_for(2), Duration::from_secs(120));
        assert_eq!(detector.cooldown_for(7), Duration::from_secs(3600));
        assert_eq!(detector.cooldown_for(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn scan_detection_rules() {
        let paths = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<VecDeque<_>>();
        assert!(is_sequential_scan(&paths(&["/a/1", "/a/2", "/a/3", "/a/4"]), 4));
        assert!(is_sequential_scan(&paths(&["/x", "/a/10", "/a/8", "/a/6", "/a/4"]), 4));
        assert!(!is_sequential_scan(&paths(&["/a/1", "/a/2", "/a/4", "/a/5"]), 4));
        assert!(!is_sequential_scan(&paths(&["/a/1", "/a/1", "/a/1", "/a/1"]), 4));
        assert!(!is_sequential_scan(&paths(&["/a/1", "/b/2", "/a/3", "/a/4"]), 4));
        assert!(!is_sequential_scan(&paths(&["/a/1", "/a/2", "/a/3"]), 4));
        assert!(!is_sequential_scan(&paths(&["1", "2", "3", "4"]), 4));
    }

    #[derive(Debug)]
    struct DownStore;

    #[async_trait::async_trait]
    impl SharedStore for DownStore {
        async fn increment(&self, _: &str, _: i64, _: Duration) -> Result<crate::store::Counter, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn get(&self, _: &str) -> Result<Option<Vec<u8>>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn set(&self, _: &str, _: Vec<u8>, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn compare_and_swap(
            &self,
            _: &str,
            _: Option<&[u8]>,
            _: Vec<u8>,
            _: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        async fn delete_prefix(&self, _: &str) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let detector = AbuseDetector::new(Arc::new(DownStore), "t", AbuseConfig::default());
        let assessment = detector.assess(&client(), "/documentation/react", None).await;
        assert!(assessment.degraded);
        assert_eq!(assessment.verdict, Verdict::Allow { ceiling_multiplier: 1.0 });
    }

    /// Delegates to an in-memory store but never lets a profile write land.
    #[derive(Debug)]
    struct LosingStore(InMemoryStore);

    #[async_trait::async_trait]
    impl SharedStore for LosingStore {
        async fn increment(&self, k: &str, d: i64, t: Duration) -> Result<crate::store::Counter, StoreError> {
            self.0.increment(k, d, t).await
        }
        async fn get(&self, k: &str) -> Result<Option<Vec<u8>>, StoreError> {
            self.0.get(k).await
        }
        async fn set(&self, k: &str, v: Vec<u8>, t: Duration) -> Result<(), StoreError> {
            self.0.set(k, v, t).await
        }
        async fn compare_and_swap(
            &self,
            _: &str,
            _: Option<&[u8]>,
            _: Vec<u8>,
            _: Duration,
        ) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn delete(&self, k: &str) -> Result<bool, StoreError> {
            self.0.delete(k).await
        }
        async fn delete_prefix(&self, p: &str) -> Result<u64, StoreError> {
            self.0.delete_prefix(p).await
        }
    }

    #[tokio::test]
    async fn lost_races_still_cost_trust() {
        let clock = ManualClock::new(10_000_000);
        let store = LosingStore(InMemoryStore::with_clock(Arc::new(clock.clone())));
        let detector =
            AbuseDetector::with_clock(Arc::new(store), "t", AbuseConfig::default(), Arc::new(clock.clone()));

        // Frozen clock: every request after the first lands in the same burst window.
        let mut last = None;
        for _ in 0..6 {
            last = Some(detector.assess(&client(), "/documentation/react", None).await);
        }
        let last = last.unwrap();
        assert!(!last.degraded);
        assert_eq!(last.flags, vec![AbuseFlag::RapidFire]);
        assert!(last.verdict.is_blocked(), "got {:?}", last.verdict);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_requests_are_charged() {
        let (detector, _clock) = detector();
        let detector = Arc::new(detector);

        let handles: Vec<_> = (0..25)
            .map(|_| {
                let detector = detector.clone();
                tokio::spawn(async move { detector.assess(&client(), "/documentation/react", None).await })
            })
            .collect();
        for handle in handles {
            assert!(!handle.await.unwrap().degraded);
        }

        let after = detector.evaluate(&client(), "/documentation/react", None).await;
        assert!(after.is_blocked(), "got {:?}", after);
    }
}
