use std::fmt;
use std::time::Duration;

use crate::abuse::AbuseFlag;
use crate::identity::Tier;
use crate::request::ResourceClass;

/// Events emitted while a request moves through the gateway.
///
/// These describe admission decisions and cache behaviour; they never carry API keys or
/// client addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Rate limiter decisions
    Admission(AdmissionEvent),
    /// Abuse detector flags and transitions
    Abuse(AbuseEvent),
    /// Edge cache lookups and writes
    Cache(CacheEvent),
    /// Request coalescer activity
    Coalesce(CoalesceEvent),
    /// Documentation backend outcomes
    Backend(BackendOutcome),
    /// A shared-store failure that the pipeline degraded around
    StoreDegraded {
        /// Component that failed open or fell back
        component: &'static str,
    },
}

/// Events emitted by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// Request admitted within its ceiling.
    Allowed {
        tier: Tier,
        /// Requests left in the current window
        remaining: u64,
    },
    /// Request rejected for exceeding its ceiling.
    RateLimited {
        tier: Tier,
        /// Time until the window resets
        retry_after: Duration,
    },
}

/// Events emitted by the abuse detector.
#[derive(Debug, Clone, PartialEq)]
pub enum AbuseEvent {
    /// A behavioural signal lowered the trust score.
    Flagged {
        flag: AbuseFlag,
        /// Score after the penalty
        score: i64,
    },
    /// The identity is served with a reduced ceiling.
    Throttled {
        /// Factor applied to the ceiling
        factor: f64,
    },
    /// The identity entered a cool-down.
    Blocked {
        cooldown: Duration,
        /// Offences recorded so far, including this one
        offences: u32,
    },
    /// A request arrived during an active cool-down.
    Rejected {
        remaining: Duration,
    },
}

/// Events emitted by the edge cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Hit { class: ResourceClass },
    Miss { class: ResourceClass },
    /// A premium client bypassed the cached entry.
    Bypassed { class: ResourceClass },
    Stored { class: ResourceClass, ttl: Duration },
    /// All entries were invalidated by an administrator.
    Invalidated { removed: u64 },
}

/// Events emitted by the request coalescer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceEvent {
    /// This request started the backend fetch.
    Leader,
    /// This request waited on a fetch already in flight.
    Joined,
    /// The shared fetch exceeded its timeout.
    TimedOut { timeout: Duration },
}

/// Backend fetch outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendOutcome {
    Success {
        /// Time the caller spent waiting on the (possibly shared) fetch
        duration: Duration,
    },
    Failure {
        duration: Duration,
    },
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::Admission(event) => write!(f, "Admission::{}", event),
            GatewayEvent::Abuse(event) => write!(f, "Abuse::{}", event),
            GatewayEvent::Cache(event) => write!(f, "Cache::{}", event),
            GatewayEvent::Coalesce(event) => write!(f, "Coalesce::{}", event),
            GatewayEvent::Backend(event) => write!(f, "Backend::{}", event),
            GatewayEvent::StoreDegraded { component } => {
                write!(f, "StoreDegraded(component={})", component)
            }
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Allowed { tier, remaining } => {
                write!(f, "Allowed(tier={}, remaining={})", tier, remaining)
            }
            AdmissionEvent::RateLimited { tier, retry_after } => {
                write!(f, "RateLimited(tier={}, retry_after={:?})", tier, retry_after)
            }
        }
    }
}

impl fmt::Display for AbuseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbuseEvent::Flagged { flag, score } => {
                write!(f, "Flagged({}, score={})", flag, score)
            }
            AbuseEvent::Throttled { factor } => write!(f, "Throttled(factor={})", factor),
            AbuseEvent::Blocked { cooldown, offences } => {
                write!(f, "Blocked(cooldown={:?}, offences={})", cooldown, offences)
            }
            AbuseEvent::Rejected { remaining } => write!(f, "Rejected(remaining={:?})", remaining),
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheEvent::Hit { class } => write!(f, "Hit({})", class),
            CacheEvent::Miss { class } => write!(f, "Miss({})", class),
            CacheEvent::Bypassed { class } => write!(f, "Bypassed({})", class),
            CacheEvent::Stored { class, ttl } => write!(f, "Stored({}, ttl={:?})", class, ttl),
            CacheEvent::Invalidated { removed } => write!(f, "Invalidated(removed={})", removed),
        }
    }
}

impl fmt::Display for CoalesceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoalesceEvent::Leader => write!(f, "Leader"),
            CoalesceEvent::Joined => write!(f, "Joined"),
            CoalesceEvent::TimedOut { timeout } => write!(f, "TimedOut(timeout={:?})", timeout),
        }
    }
}

impl fmt::Display for BackendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendOutcome::Success { duration } => write!(f, "Success(duration={:?})", duration),
            BackendOutcome::Failure { duration } => write!(f, "Failure(duration={:?})", duration),
        }
    }
}
