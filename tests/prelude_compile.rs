//! Compile-time prelude coverage test.
use docshield::prelude::*;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tower::{Service, ServiceExt};

#[derive(Debug)]
struct Static;

#[async_trait::async_trait]
impl DocProvider for Static {
    async fn fetch(&self, _class: ResourceClass, _request: DocRequest) -> Result<DocResponse, ProviderError> {
        Ok(DocResponse::new(serde_json::json!("ok")))
    }
}

#[tokio::test]
async fn prelude_reexports_core_types() {
    let config = GatewayConfig {
        cache: CacheConfig { local_ttl_ms: Some(1_000), ..CacheConfig::default() },
        ..GatewayConfig::default()
    };
    let mut svc = Gateway::new(config, Arc::new(InMemoryStore::new()), Arc::new(Static))
        .expect("valid config")
        .with_sink(LogSink);

    let request = GatewayRequest::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        DocRequest::new(ResourceClass::Listing, "frameworks"),
    );
    let response = svc.ready().await.expect("ready").call(request).await.expect("served");
    assert_eq!(response.cache, CacheStatus::Miss);
    assert_eq!(response.response.body, serde_json::json!("ok"));
}
