#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # docshield
//!
//! Protection and caching gateway for documentation backends.
//!
//! ## Features
//!
//! - **Tiered rate limiting** with fixed windows in a shared store (public, demo, premium)
//! - **Abuse detection** with trust scores, rapid-fire and sequential-scan signals, and
//!   escalating cool-downs
//! - **Edge caching** with per-resource-class TTLs and lazy expiry
//! - **Request coalescing** so concurrent identical misses hit the backend once
//! - **Fail-open admission** when the shared store is unavailable
//! - **Structured telemetry** through `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use docshield::prelude::*;
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Backend;
//!
//! #[async_trait::async_trait]
//! impl DocProvider for Backend {
//!     async fn fetch(
//!         &self,
//!         _class: ResourceClass,
//!         request: DocRequest,
//!     ) -> Result<DocResponse, ProviderError> {
//!         Ok(DocResponse::new(serde_json::json!({ "path": request.path })))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let gateway = Gateway::new(
//!         GatewayConfig::default(),
//!         Arc::new(InMemoryStore::new()),
//!         Arc::new(Backend),
//!     )
//!     .unwrap();
//!
//!     let request = GatewayRequest::new(
//!         IpAddr::V4(Ipv4Addr::LOCALHOST),
//!         DocRequest::new(ResourceClass::Documentation, "react/hooks"),
//!     );
//!     let response = gateway.handle(request).await.unwrap();
//!     assert_eq!(response.cache, CacheStatus::Miss);
//! }
//! ```

pub mod abuse;
pub mod adaptive;
pub mod cache;
pub mod clock;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod identity;
pub mod prelude;
pub mod provider;
pub mod rate_limit;
pub mod request;
pub mod stats;
pub mod store;
pub mod telemetry;

// Re-exports
pub use abuse::{AbuseDetector, AbuseFlag, Verdict};
pub use adaptive::DynamicConfig;
pub use cache::{CacheEntry, CacheLookup, EdgeCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coalesce::{CoalesceError, RequestCoalescer};
pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, StoreError};
pub use fingerprint::{Fingerprinter, RequestFingerprint};
pub use gateway::{CacheStatus, Gateway, GatewayRequest, GatewayResponse, RateInfo};
pub use identity::{ClientIdentity, Tier};
pub use provider::{DocProvider, ProviderError};
pub use rate_limit::{Admission, RateLimiter};
pub use request::{DocRequest, DocResponse, ResourceClass};
pub use stats::ProtectionStats;
pub use store::{Counter, InMemoryStore, SharedStore};
