//! Telemetry and observability for the gateway pipeline.
//!
//! The gateway emits structured [`GatewayEvent`]s describing admission decisions, abuse
//! transitions, cache behaviour and backend outcomes. Events flow through
//! [`TelemetrySink`] implementations which can log, aggregate, or forward them.
//!
//! # Event Types
//!
//! - **Rate limiter**: `Allowed`, `RateLimited`
//! - **Abuse detector**: `Flagged`, `Throttled`, `Blocked`, `Rejected`
//! - **Edge cache**: `Hit`, `Miss`, `Bypassed`, `Stored`, `Invalidated`
//! - **Coalescer**: `Leader`, `Joined`, `TimedOut`
//! - **Backend**: `Success`, `Failure`
//!
//! # Telemetry Sinks
//!
//! `TelemetrySink` is a `tower::Service<GatewayEvent>`, so sinks compose with standard
//! tower combinators. Emission is best-effort and never fails a request.

pub mod events;
pub mod sinks;

pub use events::{
    AbuseEvent, AdmissionEvent, BackendOutcome, CacheEvent, CoalesceEvent, GatewayEvent,
};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
