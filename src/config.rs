//! Gateway configuration.
//!
//! Every section deserializes with defaults for missing fields, so a JSON file only needs to
//! name what it overrides. [`GatewayConfig::validate`] runs before any component is built.

use crate::identity::Tier;
use crate::request::ResourceClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Errors produced when validating configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A tier ceiling must admit at least one request.
    #[error("ceiling for tier '{tier}' must be > 0")]
    ZeroCeiling { tier: Tier },
    /// A tier window must be non-zero.
    #[error("window for tier '{tier}' must be > 0")]
    ZeroWindow { tier: Tier },
    /// A duration setting must be non-zero.
    #[error("{name} must be > 0")]
    ZeroDuration { name: &'static str },
    /// Trust score bounds or thresholds are out of order.
    #[error("invalid trust score layout: {0}")]
    ScoreLayout(String),
    /// A multiplier or factor is outside its allowed range.
    #[error("{name} out of range (got {value})")]
    OutOfRange { name: &'static str, value: f64 },
    /// A key prefix is empty or collides with another.
    #[error("invalid key prefix: {0}")]
    KeyPrefix(String),
    /// The configuration document could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}

/// API key classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub demo_prefix: String,
    pub premium_prefix: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self { demo_prefix: "demo_".into(), premium_prefix: "premium_".into() }
    }
}

/// Ceiling and window for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimit {
    pub ceiling: u64,
    pub window_secs: u64,
}

impl TierLimit {
    /// Create a limit with validation.
    pub fn new(ceiling: u64, window: Duration, tier: Tier) -> Result<Self, ConfigError> {
        let limit = Self { ceiling, window_secs: window.as_secs() };
        limit.validate(tier)?;
        Ok(limit)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self, tier: Tier) -> Result<(), ConfigError> {
        if self.ceiling == 0 {
            return Err(ConfigError::ZeroCeiling { tier });
        }
        if self.window_secs == 0 {
            return Err(ConfigError::ZeroWindow { tier });
        }
        Ok(())
    }
}

/// Per-tier limits; the rate limiter holds these in a live-updatable handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    pub public: TierLimit,
    pub demo: TierLimit,
    pub premium: TierLimit,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            public: TierLimit { ceiling: 30, window_secs: 60 },
            demo: TierLimit { ceiling: 100, window_secs: 60 },
            premium: TierLimit { ceiling: 1000, window_secs: 60 },
        }
    }
}

impl TierLimits {
    pub fn for_tier(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Public => self.public,
            Tier::Demo => self.demo,
            Tier::Premium => self.premium,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.public.validate(Tier::Public)?;
        self.demo.validate(Tier::Demo)?;
        self.premium.validate(Tier::Premium)
    }
}

/// Trust scoring and escalation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseConfig {
    pub min_score: i64,
    pub max_score: i64,
    pub initial_score: i64,
    /// Subtracted per flag.
    pub violation_penalty: i64,
    /// Added once per `clean_period_secs` of flag-free traffic.
    pub clean_reward: i64,
    pub clean_period_secs: u64,
    /// Requests closer together than this are flagged as rapid fire.
    pub rapid_fire_threshold_ms: u64,
    /// Number of trailing paths that must form a sequence to flag a scan.
    pub scan_window: usize,
    /// Paths remembered per identity.
    pub path_history: usize,
    /// Trust at or below this blocks the identity.
    pub block_threshold: i64,
    /// Effective score below this throttles the identity.
    pub throttle_threshold: i64,
    /// Ceiling factor applied while throttled, in (0, 1].
    pub throttle_factor: f64,
    /// Trust at or above this earns `relaxed_multiplier`.
    pub relaxed_threshold: i64,
    pub relaxed_multiplier: f64,
    /// Points a reputation of 1.0 subtracts from the effective score.
    pub reputation_weight: f64,
    pub base_cooldown_secs: u64,
    pub max_cooldown_secs: u64,
    /// Idle profiles expire after this long.
    pub profile_ttl_secs: u64,
    /// Compare-and-swap attempts before a request is answered without its profile write.
    pub max_update_attempts: usize,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            min_score: 0,
            max_score: 100,
            initial_score: 50,
            violation_penalty: 10,
            clean_reward: 1,
            clean_period_secs: 60,
            rapid_fire_threshold_ms: 100,
            scan_window: 4,
            path_history: 8,
            block_threshold: 0,
            throttle_threshold: 30,
            throttle_factor: 0.5,
            relaxed_threshold: 80,
            relaxed_multiplier: 2.0,
            reputation_weight: 40.0,
            base_cooldown_secs: 60,
            max_cooldown_secs: 3600,
            profile_ttl_secs: 86_400,
            max_update_attempts: 3,
        }
    }
}

impl AbuseConfig {
    pub fn rapid_fire_threshold(&self) -> Duration {
        Duration::from_millis(self.rapid_fire_threshold_ms)
    }

    pub fn clean_period(&self) -> Duration {
        Duration::from_secs(self.clean_period_secs)
    }

    pub fn base_cooldown(&self) -> Duration {
        Duration::from_secs(self.base_cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }

    pub fn profile_ttl(&self) -> Duration {
        Duration::from_secs(self.profile_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_score >= self.max_score {
            return Err(ConfigError::ScoreLayout(format!(
                "min_score {} must be below max_score {}",
                self.min_score, self.max_score
            )));
        }
        if !(self.min_score..=self.max_score).contains(&self.initial_score) {
            return Err(ConfigError::ScoreLayout(format!(
                "initial_score {} outside [{}, {}]",
                self.initial_score, self.min_score, self.max_score
            )));
        }
        if self.block_threshold >= self.initial_score {
            return Err(ConfigError::ScoreLayout(
                "block_threshold must be below initial_score".into(),
            ));
        }
        if self.relaxed_threshold <= self.block_threshold {
            return Err(ConfigError::ScoreLayout(
                "relaxed_threshold must be above block_threshold".into(),
            ));
        }
        if self.violation_penalty <= 0 || self.clean_reward < 0 {
            return Err(ConfigError::ScoreLayout(
                "violation_penalty must be > 0 and clean_reward >= 0".into(),
            ));
        }
        if !(self.throttle_factor > 0.0 && self.throttle_factor <= 1.0) {
            return Err(ConfigError::OutOfRange {
                name: "throttle_factor",
                value: self.throttle_factor,
            });
        }
        if !(self.relaxed_multiplier >= 1.0 && self.relaxed_multiplier.is_finite()) {
            return Err(ConfigError::OutOfRange {
                name: "relaxed_multiplier",
                value: self.relaxed_multiplier,
            });
        }
        if !(self.reputation_weight >= 0.0 && self.reputation_weight.is_finite()) {
            return Err(ConfigError::OutOfRange {
                name: "reputation_weight",
                value: self.reputation_weight,
            });
        }
        if self.scan_window < 2 || self.path_history < self.scan_window {
            return Err(ConfigError::OutOfRange {
                name: "scan_window",
                value: self.scan_window as f64,
            });
        }
        if self.base_cooldown_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "base_cooldown_secs" });
        }
        if self.max_cooldown_secs < self.base_cooldown_secs {
            return Err(ConfigError::OutOfRange {
                name: "max_cooldown_secs",
                value: self.max_cooldown_secs as f64,
            });
        }
        // Blocked profiles are not rewritten, so the profile must outlive the longest cool-down.
        if self.max_cooldown_secs > self.profile_ttl_secs {
            return Err(ConfigError::OutOfRange {
                name: "max_cooldown_secs",
                value: self.max_cooldown_secs as f64,
            });
        }
        if self.clean_period_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "clean_period_secs" });
        }
        if self.profile_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "profile_ttl_secs" });
        }
        if self.max_update_attempts == 0 {
            return Err(ConfigError::OutOfRange { name: "max_update_attempts", value: 0.0 });
        }
        Ok(())
    }
}

/// Edge cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub documentation_ttl_secs: u64,
    pub search_ttl_secs: u64,
    pub listing_ttl_secs: u64,
    /// Classes whose responses differ by tier; the tier joins their fingerprint.
    pub tier_sensitive: Vec<ResourceClass>,
    /// Values substituted for absent optional parameters, per class.
    pub param_defaults: BTreeMap<ResourceClass, BTreeMap<String, String>>,
    /// TTL of the optional process-local layer; `None` disables it.
    pub local_ttl_ms: Option<u64>,
    pub local_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut param_defaults = BTreeMap::new();
        param_defaults.insert(
            ResourceClass::Search,
            BTreeMap::from([("limit".to_string(), "10".to_string())]),
        );
        Self {
            documentation_ttl_secs: 30 * 60,
            search_ttl_secs: 10 * 60,
            listing_ttl_secs: 60 * 60,
            tier_sensitive: Vec::new(),
            param_defaults,
            local_ttl_ms: None,
            local_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// TTL assigned to entries of `class` at write time.
    pub fn ttl_for(&self, class: ResourceClass) -> Duration {
        let secs = match class {
            ResourceClass::Documentation => self.documentation_ttl_secs,
            ResourceClass::Search => self.search_ttl_secs,
            ResourceClass::Listing => self.listing_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.documentation_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "documentation_ttl_secs" });
        }
        if self.search_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "search_ttl_secs" });
        }
        if self.listing_ttl_secs == 0 {
            return Err(ConfigError::ZeroDuration { name: "listing_ttl_secs" });
        }
        if self.local_ttl_ms == Some(0) {
            return Err(ConfigError::ZeroDuration { name: "local_ttl_ms" });
        }
        Ok(())
    }
}

/// Backend fetch settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerConfig {
    pub fetch_timeout_ms: u64,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self { fetch_timeout_ms: 10_000 }
    }
}

impl CoalescerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Prefix for every shared-store key, so several deployments can share one store.
    pub namespace: String,
    pub keys: KeyConfig,
    pub limits: TierLimits,
    pub abuse: AbuseConfig,
    pub cache: CacheConfig,
    pub coalescer: CoalescerConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            namespace: "docshield".into(),
            keys: KeyConfig::default(),
            limits: TierLimits::default(),
            abuse: AbuseConfig::default(),
            cache: CacheConfig::default(),
            coalescer: CoalescerConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::KeyPrefix("namespace cannot be empty".into()));
        }
        if self.keys.demo_prefix.is_empty() || self.keys.premium_prefix.is_empty() {
            return Err(ConfigError::KeyPrefix("tier prefixes cannot be empty".into()));
        }
        if self.keys.demo_prefix.starts_with(&self.keys.premium_prefix)
            || self.keys.premium_prefix.starts_with(&self.keys.demo_prefix)
        {
            return Err(ConfigError::KeyPrefix(format!(
                "'{}' and '{}' overlap",
                self.keys.demo_prefix, self.keys.premium_prefix
            )));
        }
        self.limits.validate()?;
        self.abuse.validate()?;
        self.cache.validate()?;
        if self.coalescer.fetch_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration { name: "fetch_timeout_ms" });
        }
        Ok(())
    }
}
